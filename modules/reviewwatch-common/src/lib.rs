pub mod config;
pub mod error;
pub mod locations;
pub mod types;

pub use config::Config;
pub use error::ReviewWatchError;
pub use locations::{FileLocationSource, LocationSource};
pub use types::*;
