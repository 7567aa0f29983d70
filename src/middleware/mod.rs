//! Built-in observer middleware

mod logger;

pub use logger::{LoggerConfig, LoggerMiddleware};
