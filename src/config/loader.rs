//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::{AgentConfig, RulesFile};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    RulesFile {
        application: String,
        source: Box<ConfigError>,
    },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::RulesFile {
                application,
                source,
            } => write!(f, "Rules file of application '{}': {}", application, source),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
///
/// Rules from each application's `rules_file` (resolved relative to the
/// config file) are appended after its inline rules.
pub fn load_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config = parse_config(&content)?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for app in &mut config.applications {
        let Some(rules_file) = &app.rules_file else {
            continue;
        };
        let rules_path = base.join(rules_file);
        let extra = load_rules_file(&rules_path).map_err(|e| ConfigError::RulesFile {
            application: app.name.clone(),
            source: Box::new(e),
        })?;
        app.rules.extend(extra.rules);
    }

    validate_config(&config).map_err(ConfigError::Validation)?;

    tracing::debug!(
        path = %path.display(),
        applications = config.applications.len(),
        "Configuration loaded"
    );

    Ok(config)
}

/// Parse a config document without touching the filesystem.
pub fn parse_config(content: &str) -> Result<AgentConfig, ConfigError> {
    toml::from_str(content).map_err(ConfigError::Parse)
}

fn load_rules_file(path: &Path) -> Result<RulesFile, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_inline_and_file_rules() {
        let dir = tempfile::tempdir().unwrap();
        let rules_path = dir.path().join("extra.toml");
        fs::write(
            &rules_path,
            r#"
            [[rules]]
            id = 200
            phase = "response"
            target = "status"
            operator = "eq"
            value = "500"
            action = "deny"
            "#,
        )
        .unwrap();

        let config_path = dir.path().join("agent.toml");
        let mut file = fs::File::create(&config_path).unwrap();
        write!(
            file,
            r#"
            bind = "127.0.0.1:0"

            [[applications]]
            name = "default"
            rules_file = "extra.toml"

            [[applications.rules]]
            id = 101
            phase = "request"
            target = "path"
            operator = "streq"
            value = "/admin"
            action = "deny"
            "#
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        let ids: Vec<u32> = config.applications[0].rules.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![101, 200]);
    }

    #[test]
    fn missing_rules_file_names_the_application() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("agent.toml");
        fs::write(
            &config_path,
            r#"
            [[applications]]
            name = "shop"
            rules_file = "nope.toml"
            "#,
        )
        .unwrap();

        let err = load_config(&config_path).unwrap_err();
        assert!(matches!(err, ConfigError::RulesFile { ref application, .. } if application == "shop"));
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        assert!(matches!(parse_config("bind = "), Err(ConfigError::Parse(_))));
    }
}
