pub mod config;
pub mod logger;
pub mod presentation_toml;

pub use config::*;
pub use logger::setup_logging;
pub use presentation_toml::{PresentationToml, apply_file_to_config, load_presentation_toml};
