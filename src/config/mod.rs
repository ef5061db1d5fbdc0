// Configuration - YAML settings for the detection service
pub mod settings;

pub use settings::*;
