// Configuration read from the environment, with the API key falling back
// to a token file in the user's home directory.

use std::path::PathBuf;
use std::time::Duration;

use crate::transfer::DEFAULT_TRANSFER_TIMEOUT;

pub const DEFAULT_API_URL: &str = "https://api.linear.app/graphql";
const TOKEN_FILE: &str = ".linear_token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    pub api_key: Option<String>,
    pub transfer_timeout: Duration,
}

impl Config {
    /// Build from `LINEAR_API_URL`, `LINEAR_API_KEY` and
    /// `LINEAR_UPLOAD_TIMEOUT_SECS`. Without an API key in the environment,
    /// `~/.linear_token` is tried.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), token_path())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>, token_file: Option<PathBuf>) -> Self {
        let api_url = lookup("LINEAR_API_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.into());

        let api_key = lookup("LINEAR_API_KEY")
            .or_else(|| token_file.and_then(|path| std::fs::read_to_string(path).ok()))
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let transfer_timeout = lookup("LINEAR_UPLOAD_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TRANSFER_TIMEOUT);

        Self {
            api_url,
            api_key,
            transfer_timeout,
        }
    }
}

fn token_path() -> Option<PathBuf> {
    dirs::home_dir().map(|dir| dir.join(TOKEN_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[]), None);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.api_key, None);
        assert_eq!(config.transfer_timeout, DEFAULT_TRANSFER_TIMEOUT);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(
            lookup(&[
                ("LINEAR_API_URL", "http://localhost:4000/graphql"),
                ("LINEAR_API_KEY", " lin_api_123 \n"),
                ("LINEAR_UPLOAD_TIMEOUT_SECS", "60"),
            ]),
            None,
        );
        assert_eq!(config.api_url, "http://localhost:4000/graphql");
        assert_eq!(config.api_key.as_deref(), Some("lin_api_123"));
        assert_eq!(config.transfer_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_token_file_fallback() {
        let dir = TempDir::new().unwrap();
        let token = dir.path().join(TOKEN_FILE);
        std::fs::write(&token, "lin_api_from_file\n").unwrap();

        let config = Config::from_lookup(lookup(&[]), Some(token.clone()));
        assert_eq!(config.api_key.as_deref(), Some("lin_api_from_file"));

        let config = Config::from_lookup(lookup(&[("LINEAR_API_KEY", "env_wins")]), Some(token));
        assert_eq!(config.api_key.as_deref(), Some("env_wins"));
    }
}
