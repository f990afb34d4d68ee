use super::{
    types::{Config, ProviderConfig, ProviderKind},
    ConfigError,
};

/// Validate configuration
/// Currently validates:
/// - Matcher threshold in (0, 1] and weights not all zero
/// - Concurrency and retry attempts are not 0
/// - Configured providers carry their backend section and a token
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let matcher = &config.matcher;
    if !(matcher.threshold > 0.0 && matcher.threshold <= 1.0) {
        return Err(ConfigError::ValidationError(format!(
            "matcher.threshold must be in (0, 1], got {}",
            matcher.threshold
        )));
    }

    let weights = [
        matcher.title_weight,
        matcher.artist_weight,
        matcher.duration_weight,
    ];
    if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
        return Err(ConfigError::ValidationError(
            "matcher weights must be non-negative and not all zero".to_string(),
        ));
    }

    if config.sync.max_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "sync.max_concurrency cannot be 0".to_string(),
        ));
    }

    if config.sync.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "sync.retry.max_attempts cannot be 0".to_string(),
        ));
    }

    if let Some(source) = &config.source {
        validate_provider("source", source)?;
    }
    if let Some(destination) = &config.destination {
        validate_provider("destination", destination)?;
    }

    Ok(())
}

fn validate_provider(side: &str, config: &ProviderConfig) -> Result<(), ConfigError> {
    let token = match config.provider {
        ProviderKind::Spotify => config.spotify.as_ref().map(|s| s.access_token.as_str()),
        ProviderKind::Tidal => {
            if let Some(tidal) = &config.tidal {
                if tidal.user_id.is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "{}.tidal.user_id cannot be empty",
                        side
                    )));
                }
            }
            config.tidal.as_ref().map(|t| t.access_token.as_str())
        }
    };

    match token {
        None => Err(ConfigError::ValidationError(format!(
            "{} provider {:?} selected but no [{}.{}] section provided",
            side,
            config.provider,
            side,
            provider_key(config.provider)
        ))),
        Some("") => Err(ConfigError::ValidationError(format!(
            "{}.{}.access_token cannot be empty",
            side,
            provider_key(config.provider)
        ))),
        Some(_) => Ok(()),
    }
}

fn provider_key(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Spotify => "spotify",
        ProviderKind::Tidal => "tidal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    #[test]
    fn test_validate_default_config() {
        let config = load_config_from_str("").unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_threshold_out_of_range() {
        let mut config = load_config_from_str("").unwrap();
        config.matcher.threshold = 1.5;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        config.matcher.threshold = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_weights() {
        let mut config = load_config_from_str("").unwrap();
        config.matcher.title_weight = 0.0;
        config.matcher.artist_weight = 0.0;
        config.matcher.duration_weight = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = load_config_from_str("").unwrap();
        config.sync.max_concurrency = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_provider_without_section() {
        let config = load_config_from_str(
            r#"
[destination]
provider = "tidal"
"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("[destination.tidal]"));
    }

    #[test]
    fn test_validate_empty_token() {
        let config = load_config_from_str(
            r#"
[source]
provider = "spotify"

[source.spotify]
access_token = ""
"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("access_token"));
    }
}
