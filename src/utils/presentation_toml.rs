//! Load `work-presentation.toml` (CLI only). Settings live under a `[settings]` table.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::utils::config::{Postpone, WorkerConfig, parse_duration};

#[derive(Debug, Default, Deserialize)]
pub struct PresentationToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    repository_url: Option<String>,
    db_path: Option<String>,
    threads: Option<usize>,
    queue_deduplicate: Option<bool>,
    pool_size: Option<usize>,
    executor_threads: Option<usize>,
    user_agent: Option<String>,
    postpone: Option<String>,
    max_tries: Option<u32>,
    hung_after: Option<String>,
    verbose: Option<bool>,
}

impl PresentationToml {
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).context("parse config file")
    }
}

/// Load the config file at `path`. A missing file yields `None`; a malformed one is logged and ignored.
pub fn load_presentation_toml(path: &Path) -> Option<PresentationToml> {
    let s = std::fs::read_to_string(path).ok()?;
    PresentationToml::parse(&s)
        .map_err(|e| log::warn!("{}: {:#}", path.display(), e))
        .ok()
}

/// Overwrite config field from file when present.
macro_rules! apply_file_opt {
    ($file:expr, $config:expr, $file_field:ident => $config_field:ident) => {
        if let Some(v) = $file.$file_field.clone() {
            $config.$config_field = v;
        }
    };
}

/// Apply file settings to `config` (only fields present in the file). Call before env and CLI.
pub fn apply_file_to_config(file: &PresentationToml, config: &mut WorkerConfig) -> Result<()> {
    let s = &file.settings;
    if let Some(ref url) = s.repository_url {
        config.repository_url = Some(url.clone());
    }
    if let Some(ref p) = s.db_path {
        config.db_path = PathBuf::from(p);
    }
    apply_file_opt!(s, config, threads => threads);
    apply_file_opt!(s, config, queue_deduplicate => queue_deduplicate);
    apply_file_opt!(s, config, pool_size => pool_size);
    apply_file_opt!(s, config, executor_threads => executor_threads);
    apply_file_opt!(s, config, user_agent => user_agent);
    apply_file_opt!(s, config, max_tries => max_tries);
    apply_file_opt!(s, config, verbose => verbose);
    if let Some(ref p) = s.postpone {
        config.postpone = p.parse::<Postpone>().context("settings.postpone")?;
    }
    if let Some(ref h) = s.hung_after {
        config.hung_after = parse_duration(h).context("settings.hung_after")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn only_present_fields_are_applied() {
        let file = PresentationToml::parse(
            r#"
            [settings]
            threads = 8
            postpone = "100ms-2s"
            "#,
        )
        .unwrap();
        let mut config = WorkerConfig::default();
        apply_file_to_config(&file, &mut config).unwrap();
        assert_eq!(config.threads, 8);
        assert_eq!(config.postpone.max, Duration::from_secs(2));
        assert!(config.queue_deduplicate);
    }
}
