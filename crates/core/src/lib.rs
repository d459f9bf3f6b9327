pub mod config;
pub mod error;

pub use config::{load_dotenv, parse_duration, AlertingConfig, MAX_DURATION};
pub use error::*;
