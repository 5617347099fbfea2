use std::env;

use anyhow::Context;

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Process configuration read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Absent means narrative and decision calls always take the
    /// template path.
    pub anthropic_api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        let max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        Ok(Self {
            database_url,
            max_connections,
            anthropic_api_key: lookup("ANTHROPIC_API_KEY").filter(|key| !key.trim().is_empty()),
            model: lookup("NARRATIVE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: lookup("NARRATIVE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_fill_optional_settings() {
        let config = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/health")])).unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.anthropic_api_key, None);
        assert_eq!(config.base_url, "https://api.anthropic.com");
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn overrides_are_read() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/health"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("NARRATIVE_MODEL", "claude-test"),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.anthropic_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model, "claude-test");
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/health"),
            ("ANTHROPIC_API_KEY", "  "),
        ]))
        .unwrap();
        assert!(config.anthropic_api_key.is_none());
    }

    #[test]
    fn database_url_is_required() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }
}
