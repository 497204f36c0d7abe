//! Client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`), with sensible defaults for everything
//! except the API base URL.

use std::time::Duration;

use crate::channel::backoff::BackoffPolicy;
use crate::error::ChannelError;

/// Top-level client configuration.
///
/// Construct directly via [`ClientConfig::new`] (tests, embedders) or load
/// once at startup via [`ClientConfig::from_env`]. Every `EventChannel` and
/// `ProgressAggregator` instance carries its own copy, so independent
/// instances with different settings can coexist in one process.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP(S) base URL of the API (e.g. `https://api.example.com`).
    /// The WebSocket origin is derived from it.
    pub api_base_url: String,

    /// Reconnection behaviour of the event channel.
    pub backoff: BackoffPolicy,

    /// Coalescing window for transient job-progress updates.
    pub progress_throttle: Duration,

    /// Path of the multipart import endpoint, relative to the base URL.
    pub import_path: String,

    /// Deduplication threshold forwarded with every upload.
    pub deduplicate_threshold: u32,
}

impl ClientConfig {
    /// Creates a configuration with the given base URL and default
    /// reconnection and throttling settings.
    #[must_use]
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            backoff: BackoffPolicy::default(),
            progress_throttle: Duration::from_millis(100),
            import_path: "/api/import".to_string(),
            deduplicate_threshold: 60,
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    /// Falls back to defaults for every variable except `PULSE_API_URL`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Configuration`] if `PULSE_API_URL` is not
    /// set.
    pub fn from_env() -> Result<Self, ChannelError> {
        dotenvy::dotenv().ok();

        let api_base_url = std::env::var("PULSE_API_URL").map_err(|_| {
            ChannelError::Configuration("PULSE_API_URL is not set".to_string())
        })?;

        let attempts: u32 = parse_env("PULSE_RECONNECT_ATTEMPTS", 10);
        let backoff = BackoffPolicy {
            auto_reconnect: parse_env_bool("PULSE_AUTO_RECONNECT", true),
            // 0 means "retry forever"
            max_attempts: (attempts > 0).then_some(attempts),
            base: Duration::from_millis(parse_env("PULSE_RECONNECT_INTERVAL_MS", 1_000)),
            max: Duration::from_millis(parse_env("PULSE_MAX_RECONNECT_INTERVAL_MS", 30_000)),
            ..BackoffPolicy::default()
        };

        Ok(Self {
            api_base_url,
            backoff,
            progress_throttle: Duration::from_millis(parse_env(
                "PULSE_PROGRESS_THROTTLE_MS",
                100,
            )),
            import_path: std::env::var("PULSE_IMPORT_PATH")
                .unwrap_or_else(|_| "/api/import".to_string()),
            deduplicate_threshold: parse_env("PULSE_DEDUPLICATE_THRESHOLD", 60),
        })
    }

    /// Derives the WebSocket origin from the API base URL.
    ///
    /// The scheme is upgraded to the matching WebSocket variant
    /// (`https` → `wss`, `http` → `ws`) and any path component is
    /// discarded, keeping only the host (and port, if present).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Configuration`] when the base URL does not
    /// start with an HTTP scheme or has no host.
    pub fn websocket_origin(&self) -> Result<String, ChannelError> {
        let parsed = self
            .api_base_url
            .strip_prefix("https://")
            .map(|rest| ("wss", rest))
            .or_else(|| {
                self.api_base_url
                    .strip_prefix("http://")
                    .map(|rest| ("ws", rest))
            });

        let Some((scheme, rest)) = parsed else {
            return Err(ChannelError::Configuration(format!(
                "api base url must start with http:// or https://: {}",
                self.api_base_url
            )));
        };

        let host = rest.split('/').next().unwrap_or(rest);
        if host.is_empty() {
            return Err(ChannelError::Configuration(format!(
                "api base url has no host: {}",
                self.api_base_url
            )));
        }

        Ok(format!("{scheme}://{host}"))
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn https_base_becomes_wss_origin() {
        let config = ClientConfig::new("https://api.example.com");
        let origin = config.websocket_origin().ok();
        assert_eq!(origin.as_deref(), Some("wss://api.example.com"));
    }

    #[test]
    fn http_base_becomes_ws_origin() {
        let config = ClientConfig::new("http://localhost:4040");
        let origin = config.websocket_origin().ok();
        assert_eq!(origin.as_deref(), Some("ws://localhost:4040"));
    }

    #[test]
    fn path_component_is_discarded() {
        let config = ClientConfig::new("https://api.example.com/v1/rpc");
        let origin = config.websocket_origin().ok();
        assert_eq!(origin.as_deref(), Some("wss://api.example.com"));
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let config = ClientConfig::new("ftp://api.example.com");
        let Err(err) = config.websocket_origin() else {
            panic!("expected a configuration error");
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn empty_host_is_rejected() {
        let config = ClientConfig::new("https:///path-only");
        assert!(config.websocket_origin().is_err());
    }

    #[test]
    fn defaults_are_sensible() {
        let config = ClientConfig::new("https://api.example.com");
        assert_eq!(config.progress_throttle, Duration::from_millis(100));
        assert_eq!(config.import_path, "/api/import");
        assert_eq!(config.deduplicate_threshold, 60);
        assert!(config.backoff.auto_reconnect);
        assert_eq!(config.backoff.max_attempts, Some(10));
    }
}
