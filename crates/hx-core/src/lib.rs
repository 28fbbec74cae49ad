pub mod error;
pub mod models;
pub mod services;

#[cfg(all(test, unix))]
mod test_support;

pub use error::{HaxigonError, Result};
