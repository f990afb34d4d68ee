use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides.
///
/// Nested keys are separated by a double underscore, e.g.
/// `TUNEBRIDGE_SYNC__MAX_CONCURRENCY=4`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("TUNEBRIDGE_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[matcher]
threshold = 0.9

[sync]
max_concurrency = 2
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.matcher.threshold, 0.9);
        assert_eq!(config.sync.max_concurrency, 2);
    }

    #[test]
    fn test_load_config_from_str_invalid_type() {
        let toml = r#"
[sync]
max_concurrency = "lots"
"#;
        let result = load_config_from_str(toml);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[source]
provider = "spotify"

[source.spotify]
access_token = "token"

[cache]
path = "/tmp/cache.db"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert!(config.source.is_some());
        assert_eq!(config.cache.path.to_str().unwrap(), "/tmp/cache.db");
    }
}
