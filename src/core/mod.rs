pub mod error;
pub mod types;

pub use error::{BoxError, DriverError, Result};
pub use types::{IoUsage, Page, TimingInformation, ValueHolder, accumulate};
