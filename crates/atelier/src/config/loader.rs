use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::migration::types::MAX_BATCH_SIZE;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Overrides `content_root` when set to a non-empty value.
pub const CONTENT_ROOT_ENV: &str = "ATELIER_CONTENT_ROOT";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut config: Config = serde_json::from_value(json_value)?;

    apply_env_overrides(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(root) = std::env::var(CONTENT_ROOT_ENV) {
        if !root.trim().is_empty() {
            log::debug!("Content root overridden by {}", CONTENT_ROOT_ENV);
            config.content_root = Some(root);
        }
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let migration = &config.migration;
    if migration.batch_size == 0 || migration.batch_size > MAX_BATCH_SIZE {
        return Err(ConfigError::Validation {
            message: format!("migration.batch_size must be between 1 and {}", MAX_BATCH_SIZE),
        });
    }
    if migration.concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "migration.concurrency must be at least 1".to_string(),
        });
    }

    for name in &migration.junk_files {
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidJunkName {
                name: name.clone(),
                reason: "Name must not be blank".to_string(),
            });
        }
        if name.contains('/') || name.contains('\\') {
            return Err(ConfigError::InvalidJunkName {
                name: name.clone(),
                reason: "Name must not contain path separators".to_string(),
            });
        }
        if name == "." || name == ".." {
            return Err(ConfigError::InvalidJunkName {
                name: name.clone(),
                reason: "Name must be a plain file name".to_string(),
            });
        }
    }

    Ok(())
}
