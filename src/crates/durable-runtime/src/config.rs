//! Executor configuration.
//!
//! `ExecutorConfig` follows this codebase's usual builder idiom: explicit code defaults,
//! overridable per-field via `with_*`, and for the ops-tunable batching/polling knobs, via
//! environment variables loaded through [`utils::config`]'s helpers. `codec` and `client`
//! are supplied by the embedding host and are never environment-configurable.

use crate::retry::RetryPolicy;
use durable_checkpoint::{Codec, JsonCodec};
use std::sync::Arc;
use std::time::Duration;
use utils::config::get_env_parse_or;

/// Tunable knobs for the [`crate::executor::Executor`].
#[derive(Clone)]
pub struct ExecutorConfig {
    pub codec: Arc<dyn Codec>,
    pub retry_default: RetryPolicy,
    pub suppress_replay_logs: bool,
    pub max_response_bytes: usize,
    pub batch_max_bytes: usize,
    pub batch_max_items: usize,
    pub batch_flush_delay: Duration,
    pub poll_initial_delay: Duration,
    pub poll_period: Duration,
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self {
            codec: Arc::new(JsonCodec::new()),
            retry_default: RetryPolicy::default(),
            suppress_replay_logs: true,
            max_response_bytes: 6 * 1024 * 1024 - 50,
            batch_max_bytes: 750 * 1024,
            batch_max_items: 500,
            batch_flush_delay: Duration::from_millis(100),
            poll_initial_delay: Duration::from_millis(100),
            poll_period: Duration::from_millis(200),
        }
    }

    /// Load the env-overridable subset of defaults from the process environment. Unset
    /// variables keep the code default; malformed ones also fall back to it.
    ///
    /// Recognized keys: `DURABLE_BATCH_MAX_BYTES`, `DURABLE_BATCH_MAX_ITEMS`,
    /// `DURABLE_BATCH_FLUSH_DELAY_MS`, `DURABLE_POLL_INITIAL_DELAY_MS`, `DURABLE_POLL_PERIOD_MS`,
    /// `DURABLE_MAX_RESPONSE_BYTES`.
    pub fn from_env() -> Self {
        let defaults = Self::new();
        Self {
            batch_max_bytes: get_env_parse_or("DURABLE_BATCH_MAX_BYTES", defaults.batch_max_bytes),
            batch_max_items: get_env_parse_or("DURABLE_BATCH_MAX_ITEMS", defaults.batch_max_items),
            batch_flush_delay: Duration::from_millis(get_env_parse_or(
                "DURABLE_BATCH_FLUSH_DELAY_MS",
                defaults.batch_flush_delay.as_millis() as u64,
            )),
            poll_initial_delay: Duration::from_millis(get_env_parse_or(
                "DURABLE_POLL_INITIAL_DELAY_MS",
                defaults.poll_initial_delay.as_millis() as u64,
            )),
            poll_period: Duration::from_millis(get_env_parse_or(
                "DURABLE_POLL_PERIOD_MS",
                defaults.poll_period.as_millis() as u64,
            )),
            max_response_bytes: get_env_parse_or("DURABLE_MAX_RESPONSE_BYTES", defaults.max_response_bytes),
            ..defaults
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_retry_default(mut self, retry_default: RetryPolicy) -> Self {
        self.retry_default = retry_default;
        self
    }

    pub fn with_suppress_replay_logs(mut self, suppress: bool) -> Self {
        self.suppress_replay_logs = suppress;
        self
    }

    pub fn with_batch_bounds(mut self, max_bytes: usize, max_items: usize) -> Self {
        self.batch_max_bytes = max_bytes;
        self.batch_max_items = max_items;
        self
    }

    pub fn with_poll_cadence(mut self, initial_delay: Duration, period: Duration) -> Self {
        self.poll_initial_delay = initial_delay;
        self.poll_period = period;
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::new()
    }
}
