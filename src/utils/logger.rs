use colored::Colorize;
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;

/// Module path of this crate, as log targets spell it.
const CRATE_TARGET: &str = "work_presentation";

pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let result = Builder::from_default_env()
        .filter_level(LevelFilter::Warn) // Default: only warnings from dependencies
        .filter_module(CRATE_TARGET, level)
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let thread = std::thread::current();
            let thread = thread.name().unwrap_or("main");
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = if record.level() == Level::Warn {
                        "WARN".yellow()
                    } else {
                        "ERROR".red()
                    };
                    let path = record.target().to_string().white();
                    format!(
                        "[{} {} {} {}] {}",
                        name.cyan(),
                        level_str,
                        thread.dimmed(),
                        path,
                        record.args()
                    )
                }
                Level::Trace => format!("[{} {}] {}", name.cyan(), "TRACE".dimmed(), record.args()),
                _ => format!("[{} {}] {}", name.cyan(), thread.dimmed(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
    if let Err(e) = result {
        log::debug!("Logger already initialised: {e}");
    }
}
