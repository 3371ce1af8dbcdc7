//! Command line: argument parsing and command handlers.

pub mod arg_parser;
pub mod handlers;
pub mod progress;

pub use arg_parser::{Cli, Commands, ProcessArgs};
pub use handlers::{handle_run, resolve_config};
