use std::time::Duration;

use crate::infrastructure::binance::MarketSegment;

/// Connection and subscription settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Market segment selecting the endpoint.
    pub segment: MarketSegment,
    /// Endpoint override.
    pub url: Option<String>,
    /// Registry capacity (0 = unbounded).
    pub max_subscriptions: usize,
    /// Fixed delay between outbound subscribe commands.
    pub subscribe_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            segment: MarketSegment::Spot,
            url: None,
            max_subscriptions: 1024,
            subscribe_interval: Duration::from_millis(250),
        }
    }
}

impl StreamSettings {
    /// Endpoint to connect to: the override if set, else the segment URL.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| self.segment.url().to_string())
    }
}

/// Heartbeat settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Start the heartbeat task when the venue has a probe.
    pub enabled: bool,
    /// Sleep between probes.
    pub interval: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

/// Reconnection backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// Initial reconnection delay (0 = immediate).
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Jitter fraction.
    pub jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            jitter: 0.1,
            max_attempts: 0, // Unlimited
        }
    }
}

/// Feeds the binary subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Human-readable symbols.
    pub symbols: Vec<String>,
    /// Order book depth.
    pub book_levels: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            symbols: vec!["BTC/USDT".to_string()],
            book_levels: 5,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    /// Connection and subscription settings.
    pub stream: StreamSettings,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatSettings,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
    /// Feeds requested by the binary.
    pub feeds: FeedSettings,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `MARKET_STREAM_SEGMENT` names an unknown segment
    /// or `MARKET_STREAM_URL` is set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// Malformed numeric values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let segment = match env.get("MARKET_STREAM_SEGMENT") {
            Some(value) => value
                .parse::<MarketSegment>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "MARKET_STREAM_SEGMENT".to_string(),
                    value,
                })?,
            None => defaults.stream.segment,
        };

        let url = match env.get("MARKET_STREAM_URL") {
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("MARKET_STREAM_URL".to_string()));
            }
            other => other,
        };

        let stream = StreamSettings {
            segment,
            url,
            max_subscriptions: env.parse(
                "MARKET_STREAM_MAX_SUBSCRIPTIONS",
                defaults.stream.max_subscriptions,
            ),
            subscribe_interval: Duration::from_millis(env.parse(
                "MARKET_STREAM_SUBSCRIBE_INTERVAL_MS",
                250,
            )),
        };

        let heartbeat = HeartbeatSettings {
            enabled: env.parse_bool("MARKET_STREAM_HEARTBEAT_ENABLED", defaults.heartbeat.enabled),
            interval: Duration::from_secs(env.parse("MARKET_STREAM_HEARTBEAT_INTERVAL_SECS", 60)),
        };

        let reconnect = ReconnectSettings {
            delay_initial: Duration::from_millis(
                env.parse("MARKET_STREAM_RECONNECT_DELAY_INITIAL_MS", 500),
            ),
            delay_max: Duration::from_secs(env.parse("MARKET_STREAM_RECONNECT_DELAY_MAX_SECS", 30)),
            delay_multiplier: env.parse_finite(
                "MARKET_STREAM_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect.delay_multiplier,
            ),
            jitter: env
                .parse_finite("MARKET_STREAM_RECONNECT_JITTER", defaults.reconnect.jitter)
                .clamp(0.0, 1.0),
            max_attempts: env.parse(
                "MARKET_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.reconnect.max_attempts,
            ),
        };

        let symbols: Vec<String> = env
            .get("MARKET_STREAM_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let feeds = FeedSettings {
            symbols: if symbols.is_empty() {
                defaults.feeds.symbols
            } else {
                symbols
            },
            book_levels: env.parse("MARKET_STREAM_BOOK_LEVELS", defaults.feeds.book_levels),
        };

        Ok(Self {
            stream,
            heartbeat,
            reconnect,
            metrics_port: env.parse("MARKET_STREAM_METRICS_PORT", defaults.metrics_port),
            feeds,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value outside its domain.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Like [`parse`](Self::parse), but `NaN` and infinities fall back too.
    fn parse_finite(&self, key: &str, default: f64) -> f64 {
        Some(self.parse(key, default))
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    fn parse_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            _ => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::websocket::{ReconnectConfig, ReconnectPolicy};
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.stream.segment, MarketSegment::Spot);
        assert_eq!(config.stream.endpoint(), MarketSegment::Spot.url());
        assert_eq!(config.stream.max_subscriptions, 1024);
        assert_eq!(config.stream.subscribe_interval, Duration::from_millis(250));
        assert!(config.heartbeat.enabled);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(60));
        assert_eq!(config.reconnect.delay_initial, Duration::from_millis(500));
        assert_eq!(config.reconnect.delay_max, Duration::from_secs(30));
        assert!((config.reconnect.delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert!((config.reconnect.jitter - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.metrics_port, 0);
        assert_eq!(config.feeds.symbols, vec!["BTC/USDT".to_string()]);
        assert_eq!(config.feeds.book_levels, 5);
    }

    #[test]
    fn overrides_apply() {
        let config = config_from(&[
            ("MARKET_STREAM_SEGMENT", "future_u"),
            ("MARKET_STREAM_MAX_SUBSCRIPTIONS", "0"),
            ("MARKET_STREAM_SUBSCRIBE_INTERVAL_MS", "10"),
            ("MARKET_STREAM_HEARTBEAT_ENABLED", "false"),
            ("MARKET_STREAM_RECONNECT_DELAY_INITIAL_MS", "0"),
            ("MARKET_STREAM_MAX_RECONNECT_ATTEMPTS", "5"),
            ("MARKET_STREAM_METRICS_PORT", "9464"),
            ("MARKET_STREAM_SYMBOLS", "BTC/USDT, ETH/USDT,,"),
        ])
        .unwrap();

        assert_eq!(config.stream.segment, MarketSegment::LinearFutures);
        assert_eq!(config.stream.endpoint(), "wss://fstream.binance.com/ws/stream");
        assert_eq!(config.stream.max_subscriptions, 0);
        assert_eq!(config.stream.subscribe_interval, Duration::from_millis(10));
        assert!(!config.heartbeat.enabled);
        assert_eq!(config.reconnect.delay_initial, Duration::ZERO);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.metrics_port, 9464);
        assert_eq!(config.feeds.symbols, vec!["BTC/USDT", "ETH/USDT"]);
    }

    #[test]
    fn url_override_wins() {
        let config = config_from(&[("MARKET_STREAM_URL", "ws://127.0.0.1:9000")]).unwrap();
        assert_eq!(config.stream.endpoint(), "ws://127.0.0.1:9000");
    }

    #[test]
    fn empty_url_rejected() {
        assert_eq!(
            config_from(&[("MARKET_STREAM_URL", " ")]).unwrap_err(),
            ConfigError::EmptyValue("MARKET_STREAM_URL".to_string())
        );
    }

    #[test]
    fn unknown_segment_rejected() {
        let err = config_from(&[("MARKET_STREAM_SEGMENT", "options")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "MARKET_STREAM_SEGMENT"));
    }

    #[test]
    fn malformed_numbers_fall_back() {
        let config = config_from(&[
            ("MARKET_STREAM_MAX_SUBSCRIPTIONS", "lots"),
            ("MARKET_STREAM_RECONNECT_JITTER", "7.5"),
        ])
        .unwrap();
        assert_eq!(config.stream.max_subscriptions, 1024);
        assert!((config.reconnect.jitter - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn non_finite_floats_fall_back() {
        let config = config_from(&[
            ("MARKET_STREAM_RECONNECT_JITTER", "NaN"),
            ("MARKET_STREAM_RECONNECT_DELAY_MULTIPLIER", "inf"),
        ])
        .unwrap();
        assert!((config.reconnect.jitter - 0.1).abs() < f64::EPSILON);
        assert!((config.reconnect.delay_multiplier - 2.0).abs() < f64::EPSILON);

        let mut policy = ReconnectPolicy::new(ReconnectConfig::from_settings(&config.reconnect));
        for _ in 0..5 {
            assert!(policy.next_delay().is_some());
        }
    }
}
