pub mod alerting;
pub mod capture;
pub mod config;
pub mod detection;
pub mod error;
pub mod rules;
pub mod stats;

pub use error::{KsError, Result};
