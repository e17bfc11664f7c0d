pub mod config;
pub mod error;
pub mod types;

pub use config::TabulaConfig;
pub use error::{Result, TabulaError};
pub use types::*;
