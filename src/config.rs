//! Runtime configuration, read from the environment (and `.env` if present).

use anyhow::{Context, Result};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";

/// Connection settings for the Live API.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub setup_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            setup_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Build a config from `GEMINI_API_KEY` and the optional `BANKEDGE_*` overrides.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup("GEMINI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .context("GEMINI_API_KEY is not set")?;

        let mut config = Config {
            api_key,
            ..Default::default()
        };
        if let Some(model) = lookup("BANKEDGE_MODEL") {
            config.model = model;
        }
        if let Some(endpoint) = lookup("BANKEDGE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(secs) = lookup("BANKEDGE_SETUP_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("invalid BANKEDGE_SETUP_TIMEOUT_SECS: {secs}"))?;
            config.setup_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Websocket URL with the API key attached.
    pub fn live_url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
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
    fn requires_api_key() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")])).is_err());
    }

    #[test]
    fn defaults_and_overrides() {
        let config = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "k1")])).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.setup_timeout, Duration::from_secs(10));
        assert_eq!(config.live_url(), format!("{DEFAULT_ENDPOINT}?key=k1"));

        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "k1"),
            ("BANKEDGE_MODEL", "models/other"),
            ("BANKEDGE_SETUP_TIMEOUT_SECS", "3"),
        ]))
        .unwrap();
        assert_eq!(config.model, "models/other");
        assert_eq!(config.setup_timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_timeout() {
        let result = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "k1"),
            ("BANKEDGE_SETUP_TIMEOUT_SECS", "soon"),
        ]));
        assert!(result.is_err());
    }
}
