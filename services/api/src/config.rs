//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    /// When set, user records live in Postgres instead of `users_file`.
    pub database_url: Option<String>,
    pub users_file: PathBuf,
    pub credentials_file: PathBuf,
    pub images_dir: PathBuf,
    pub openai_api_key: String,
    pub openai_api_base: Option<String>,
    pub chat_model: String,
    pub image_model: String,
    pub app_context: String,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        // --- Server Settings ---
        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:5000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Storage Locations ---
        let database_url = non_empty("DATABASE_URL");
        let users_file = PathBuf::from(var_or("USERS_FILE", "./users.json"));
        let credentials_file = PathBuf::from(var_or("CREDENTIALS_FILE", "./credentials.txt"));
        let images_dir = PathBuf::from(var_or("IMAGES_DIR", "./generated_images"));

        // --- Model Provider ---
        let openai_api_key = non_empty("OPENAI_API_KEY")
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
        let openai_api_base = non_empty("OPENAI_API_BASE");
        let chat_model = var_or("CHAT_MODEL", "gpt-4o-mini");
        let image_model = var_or("IMAGE_MODEL", "dall-e-3");
        let app_context = var_or(
            "APP_CONTEXT",
            "You are the assistant of a multi-session chat web app that can also generate images.",
        );
        let cors_origin = var_or("CORS_ORIGIN", "http://localhost:5000");

        Ok(Self {
            bind_address,
            log_level,
            database_url,
            users_file,
            credentials_file,
            images_dir,
            openai_api_key,
            openai_api_base,
            chat_model,
            image_model,
            app_context,
            cors_origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_apply_when_only_the_key_is_set() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:5000".parse().unwrap());
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.database_url, None);
        assert_eq!(config.users_file, PathBuf::from("./users.json"));
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.image_model, "dall-e-3");
    }

    #[test]
    fn test_missing_api_key_is_reported() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "OPENAI_API_KEY"));
    }

    #[test]
    fn test_invalid_bind_address_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("BIND_ADDRESS", "not-an-address"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "BIND_ADDRESS"));
    }

    #[test]
    fn test_blank_database_url_means_file_store() {
        let config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("DATABASE_URL", "  "),
        ]))
        .unwrap();
        assert_eq!(config.database_url, None);
    }
}
