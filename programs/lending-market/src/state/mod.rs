pub mod collateral;
pub mod deposit;
pub mod loan;
pub mod market;

pub use collateral::*;
pub use deposit::*;
pub use loan::*;
pub use market::*;
