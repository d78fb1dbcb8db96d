use crate::channel_wire::{normalize_namespace, DEFAULT_MAX_FRAME_BYTES};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000";
pub const DEFAULT_WS_PATH_PREFIX: &str = "/ws";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_PULSE_TTL: Duration = Duration::from_secs(3);
pub const DEFAULT_NOTIFICATION_TTL: Duration = Duration::from_secs(5);
pub const DEFAULT_SPLASH: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key}: invalid url '{value}': {reason}")]
    InvalidUrl {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{key}: unsupported scheme '{scheme}'")]
    UnsupportedScheme { key: &'static str, scheme: String },
    #[error("{key}: invalid number '{value}'")]
    InvalidNumber { key: &'static str, value: String },
}

/// Fixed-delay retry with a bounded number of consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
    /// Upper bound on one connect plus upgrade handshake; elapsing counts as a failed attempt.
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub pulse_ttl: Duration,
    pub notification_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pulse_ttl: DEFAULT_PULSE_TTL,
            notification_ttl: DEFAULT_NOTIFICATION_TTL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub base_url: Url,
    pub path_prefix: String,
    pub reconnect: ReconnectPolicy,
    pub max_frame_bytes: usize,
}

impl ChannelConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            path_prefix: DEFAULT_WS_PATH_PREFIX.to_string(),
            reconnect: ReconnectPolicy::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// `{base}{prefix}/{namespace}`, e.g. `ws://localhost:8000/ws/stats`.
    pub fn endpoint(&self, namespace: &str) -> Result<Url, ConfigError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let prefix = self.path_prefix.trim().trim_matches('/');
        let namespace = normalize_namespace(namespace);
        let raw = if prefix.is_empty() {
            format!("{base}/{namespace}")
        } else {
            format!("{base}/{prefix}/{namespace}")
        };
        Url::parse(&raw).map_err(|err| ConfigError::InvalidUrl {
            key: "JC_WS_URL",
            value: raw.clone(),
            reason: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfig {
    pub api: ApiConfig,
    pub channel: ChannelConfig,
    pub store: StoreConfig,
    pub splash: Duration,
}

/// Values given on the command line; they win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
}

impl LiveConfig {
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    pub fn resolve_with<F>(overrides: &ConfigOverrides, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_raw = resolve_value(overrides.api_url.as_deref(), &lookup, "JC_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = parse_url("JC_API_URL", &api_raw, &["http", "https"])?;

        let ws_raw = resolve_value(overrides.ws_url.as_deref(), &lookup, "JC_WS_URL")
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        let ws_url = parse_url("JC_WS_URL", &ws_raw, &["ws", "wss"])?;

        let path_prefix = resolve_value(None, &lookup, "JC_WS_PATH_PREFIX")
            .unwrap_or_else(|| DEFAULT_WS_PATH_PREFIX.to_string());

        let timeout = resolve_millis(&lookup, "JC_API_TIMEOUT_MS")?.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let reconnect = ReconnectPolicy {
            delay: resolve_millis(&lookup, "JC_RECONNECT_DELAY_MS")?.unwrap_or(DEFAULT_RECONNECT_DELAY),
            max_attempts: resolve_attempts(&lookup, "JC_RECONNECT_ATTEMPTS")?
                .unwrap_or(DEFAULT_RECONNECT_ATTEMPTS),
            connect_timeout: resolve_millis(&lookup, "JC_CONNECT_TIMEOUT_MS")?
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        };
        let splash = resolve_millis(&lookup, "JC_SPLASH_MS")?.unwrap_or(DEFAULT_SPLASH);
        let auth_token = resolve_value(None, &lookup, "JC_AUTH_TOKEN");

        Ok(Self {
            api: ApiConfig {
                base_url: api_url,
                timeout,
                auth_token,
            },
            channel: ChannelConfig {
                base_url: ws_url,
                path_prefix,
                reconnect,
                max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            },
            store: StoreConfig::default(),
            splash,
        })
    }
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn resolve_value<F>(flag: Option<&str>, lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = flag {
        if !value.trim().is_empty() {
            return Some(value.trim().to_string());
        }
    }
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_number<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match resolve_value(None, lookup, key) {
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        None => Ok(None),
    }
}

/// Attempt budgets must fit a `u32` and be at least one.
fn resolve_attempts<F>(lookup: &F, key: &'static str) -> Result<Option<u32>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = resolve_number(lookup, key)? else {
        return Ok(None);
    };
    match u32::try_from(value) {
        Ok(attempts) if attempts > 0 => Ok(Some(attempts)),
        _ => Err(ConfigError::InvalidNumber {
            key,
            value: value.to_string(),
        }),
    }
}

fn resolve_millis<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(resolve_number(lookup, key)?.map(Duration::from_millis))
}

fn parse_url(key: &'static str, raw: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|err| ConfigError::InvalidUrl {
        key,
        value: raw.to_string(),
        reason: err.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::UnsupportedScheme {
            key,
            scheme: url.scheme().to_string(),
        });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_site_backend() {
        let config = LiveConfig::resolve_with(&ConfigOverrides::default(), env(&[])).expect("resolve");
        assert_eq!(config.api.base_url.as_str(), "http://localhost:8000/");
        assert_eq!(config.api.timeout, Duration::from_secs(10));
        assert_eq!(config.channel.reconnect, ReconnectPolicy::default());
        assert_eq!(config.store.pulse_ttl, Duration::from_secs(3));
        assert_eq!(config.store.notification_ttl, Duration::from_secs(5));
        assert_eq!(
            config.channel.endpoint("stats").expect("endpoint").as_str(),
            "ws://localhost:8000/ws/stats"
        );
        assert_eq!(
            config.channel.endpoint("/leads").expect("endpoint").as_str(),
            "ws://localhost:8000/ws/leads"
        );
    }

    #[test]
    fn flags_win_over_environment() {
        let overrides = ConfigOverrides {
            api_url: Some("https://api.example.org".to_string()),
            ws_url: None,
        };
        let config = LiveConfig::resolve_with(
            &overrides,
            env(&[
                ("JC_API_URL", "http://ignored:1"),
                ("JC_WS_URL", "wss://push.example.org/"),
                ("JC_WS_PATH_PREFIX", ""),
                ("JC_RECONNECT_ATTEMPTS", "2"),
                ("JC_RECONNECT_DELAY_MS", "250"),
                ("JC_CONNECT_TIMEOUT_MS", "1500"),
                ("JC_AUTH_TOKEN", "secret"),
            ]),
        )
        .expect("resolve");
        assert_eq!(config.api.base_url.host_str(), Some("api.example.org"));
        assert_eq!(config.api.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.channel.reconnect.max_attempts, 2);
        assert_eq!(config.channel.reconnect.delay, Duration::from_millis(250));
        assert_eq!(config.channel.reconnect.connect_timeout, Duration::from_millis(1500));
        // an empty prefix falls back to the default
        assert_eq!(
            config.channel.endpoint("leads").expect("endpoint").as_str(),
            "wss://push.example.org/ws/leads"
        );
    }

    #[test]
    fn bad_values_are_errors_not_panics() {
        let err = LiveConfig::resolve_with(&ConfigOverrides::default(), env(&[("JC_WS_URL", "http://x")]))
            .expect_err("scheme");
        assert!(matches!(err, ConfigError::UnsupportedScheme { key: "JC_WS_URL", .. }));

        let err = LiveConfig::resolve_with(&ConfigOverrides::default(), env(&[("JC_API_URL", "not a url")]))
            .expect_err("url");
        assert!(matches!(err, ConfigError::InvalidUrl { key: "JC_API_URL", .. }));

        let err = LiveConfig::resolve_with(
            &ConfigOverrides::default(),
            env(&[("JC_RECONNECT_ATTEMPTS", "five")]),
        )
        .expect_err("number");
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn attempt_budget_must_fit_and_be_positive() {
        for raw in ["4294967296", "0"] {
            let err = LiveConfig::resolve_with(
                &ConfigOverrides::default(),
                env(&[("JC_RECONNECT_ATTEMPTS", raw)]),
            )
            .expect_err(raw);
            assert_eq!(
                err,
                ConfigError::InvalidNumber {
                    key: "JC_RECONNECT_ATTEMPTS",
                    value: raw.to_string(),
                }
            );
        }

        let config = LiveConfig::resolve_with(
            &ConfigOverrides::default(),
            env(&[("JC_RECONNECT_ATTEMPTS", "4294967295")]),
        )
        .expect("largest budget");
        assert_eq!(config.channel.reconnect.max_attempts, u32::MAX);
    }

    #[test]
    fn endpoint_without_prefix() {
        let mut channel = ChannelConfig::new(Url::parse("ws://127.0.0.1:9000").expect("url"));
        channel.path_prefix = String::new();
        assert_eq!(
            channel.endpoint("stats").expect("endpoint").as_str(),
            "ws://127.0.0.1:9000/stats"
        );
    }

    #[test]
    fn bool_flags() {
        assert_eq!(parse_bool_flag("YES"), Some(true));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }
}
