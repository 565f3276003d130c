pub mod category;
pub mod config;
pub mod error;
pub mod geocell;
pub mod types;

pub use config::Config;
pub use error::GeoCellError;
pub use types::*;
