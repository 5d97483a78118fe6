//! Configuration loading.

use agora_types::config::AgentConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load an agent configuration from a TOML file.
///
/// A missing, unreadable or invalid file is logged and yields the defaults,
/// so an agent always starts.
pub fn load_config(path: Option<&Path>) -> AgentConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return AgentConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match parse_config(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), agent = %config.agent.name, "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                AgentConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            AgentConfig::default()
        }
    }
}

/// Parse a configuration document. Unknown keys are ignored.
pub fn parse_config(contents: &str) -> Result<AgentConfig, toml::de::Error> {
    toml::from_str(contents)
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    agora_home().join("config.toml")
}

/// Get the default Agora home directory (`~/.agora`).
pub fn agora_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".agora")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[agent]
name = "alice"
seed = "alice recovery phrase"

[delivery]
attempt_timeout_ms = 1500

[resolver]
registry_url = "http://registry.local"

[resolver.rules]
"bob" = ["http://127.0.0.1:8001/submit"]

[relay]
mailbox_url = "http://relay.local"
"#
        )
        .unwrap();

        let config = load_config(Some(file.path()));
        assert_eq!(config.agent.name, "alice");
        assert_eq!(config.agent.seed.as_deref(), Some("alice recovery phrase"));
        assert_eq!(config.delivery.attempt_timeout_ms, 1500);
        assert_eq!(config.delivery.max_attempts_per_endpoint, 2);
        assert_eq!(config.resolver.rules["bob"], vec!["http://127.0.0.1:8001/submit"]);
        assert_eq!(config.relay.mailbox_url.as_deref(), Some("http://relay.local"));
        assert_eq!(config.relay.poll_interval_secs, 5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("nope.toml")));
        assert_eq!(config, AgentConfig::default());
    }

    #[test]
    fn test_invalid_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent\nname = ").unwrap();
        assert_eq!(load_config(Some(file.path())), AgentConfig::default());
    }

    #[test]
    fn test_home_paths() {
        assert!(agora_home().ends_with(".agora"));
        assert!(default_config_path().ends_with(".agora/config.toml"));
    }
}
