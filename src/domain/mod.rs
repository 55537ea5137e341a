pub mod error;
pub mod outcome;

pub use error::CacheError;
pub use outcome::{CacheValue, Outcome};
