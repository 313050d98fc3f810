//! Engine configuration.
//!
//! Provides the remote connection settings, sync tuning knobs and the retry
//! policy, plus `EngineConfig`, the JSON document that combines them with the
//! table registry. Nothing here reads the environment; callers supply values.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::TableRegistry;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PUSH_CONCURRENCY: usize = 8;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PASS_TIMEOUT_SECS: u64 = 600;
const DEFAULT_RETRY_BASE_SECS: u64 = 5;
const DEFAULT_RETRY_MAX_SECS: u64 = 30 * 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Supabase project connection settings.
///
/// The anon key is public; the access token is the signed-in user's JWT and
/// is redacted from `Debug` output.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Overall HTTP client timeout
    #[serde(
        default = "default_http_timeout",
        with = "duration_secs",
        rename = "request_timeout_secs"
    )]
    pub request_timeout: Duration,
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            access_token: None,
            request_timeout: default_http_timeout(),
        }
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = normalize_text_option(Some(token.into()));
        self
    }

    /// Trim values, strip trailing slashes and reject unusable settings.
    pub fn normalized(self) -> Result<Self, String> {
        let url = normalize_text_option(Some(self.url))
            .ok_or_else(|| "remote url is required".to_string())?;
        if !is_http_url(&url) {
            return Err("remote url must include http:// or https://".to_string());
        }
        let anon_key = normalize_text_option(Some(self.anon_key))
            .ok_or_else(|| "remote anon_key is required".to_string())?;
        if self.request_timeout.is_zero() {
            return Err("request_timeout_secs must be greater than zero".to_string());
        }

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key,
            access_token: normalize_text_option(self.access_token),
            request_timeout: self.request_timeout,
        })
    }

    /// PostgREST endpoint for a table.
    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.url.trim_end_matches('/'))
    }

    /// Phoenix websocket endpoint for the realtime change feed.
    pub fn realtime_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let socket_base = base
            .strip_prefix("https://")
            .map(|rest| format!("wss://{rest}"))
            .or_else(|| base.strip_prefix("http://").map(|rest| format!("ws://{rest}")))
            .unwrap_or_else(|| base.to_string());
        format!(
            "{socket_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.anon_key
        )
    }

    /// Bearer credential: the user's token when signed in, else the anon key.
    pub fn bearer_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.anon_key)
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("anon_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Backoff and dead-letter policy for queued mutations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct RetryPolicy {
    #[serde(with = "duration_secs", rename = "base_delay_secs")]
    pub base_delay: Duration,
    #[serde(with = "duration_secs", rename = "max_delay_secs")]
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(DEFAULT_RETRY_BASE_SECS),
            max_delay: Duration::from_secs(DEFAULT_RETRY_MAX_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next replay after `attempts` failures:
    /// `base * 2^(attempts - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.saturating_pow(attempts - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether an entry with this many failures is retired.
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Tuning for sync passes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct SyncOptions {
    /// Maximum in-flight pushes during a full sync
    pub push_concurrency: usize,
    /// Deadline for each remote call
    #[serde(with = "duration_secs", rename = "request_timeout_secs")]
    pub request_timeout: Duration,
    /// Deadline for a whole full sync pass
    #[serde(with = "duration_secs", rename = "pass_timeout_secs")]
    pub pass_timeout: Duration,
    /// Pull only rows changed since the cursor during full sync.
    ///
    /// Off by default: full sync downloads every table completely.
    pub incremental_pull: bool,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            push_concurrency: DEFAULT_PUSH_CONCURRENCY,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            pass_timeout: Duration::from_secs(DEFAULT_PASS_TIMEOUT_SECS),
            incremental_pull: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncOptions {
    fn validate(&self) -> Result<(), String> {
        if self.push_concurrency == 0 {
            return Err("push_concurrency must be at least 1".to_string());
        }
        if self.request_timeout.is_zero() || self.pass_timeout.is_zero() {
            return Err("timeouts must be greater than zero".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err("retry.base_delay_secs must not exceed retry.max_delay_secs".to_string());
        }
        Ok(())
    }
}

/// Complete engine configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    pub tables: TableRegistry,
    #[serde(default)]
    pub sync: SyncOptions,
}

/// Parse and validate an engine configuration from JSON.
pub fn parse_engine_config(payload: &str) -> Result<EngineConfig, String> {
    let raw: EngineConfig = serde_json::from_str(payload)
        .map_err(|error| format!("invalid engine config JSON: {error}"))?;
    raw.validated()
}

impl EngineConfig {
    /// Re-run every check that deserialization skips.
    pub fn validated(self) -> Result<Self, String> {
        let tables = TableRegistry::new(
            self.tables
                .mappings()
                .map(|mapping| (mapping.local.clone(), mapping.remote.clone())),
        )
        .map_err(|error| error.to_string())?;
        if tables.is_empty() {
            return Err("at least one table must be registered".to_string());
        }
        self.sync.validate()?;
        let remote = self.remote.map(RemoteConfig::normalized).transpose()?;

        Ok(Self {
            remote,
            tables,
            sync: self.sync,
        })
    }
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
