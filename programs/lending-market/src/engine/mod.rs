pub mod accrual;
pub mod buyout;
pub mod liquidation;
pub mod ops;
pub mod valuation;

pub use accrual::*;
pub use buyout::*;
pub use liquidation::*;
pub use ops::*;
pub use valuation::*;
