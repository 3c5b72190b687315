use crate::types::DEFAULT_MEDIA_RECEIVER;
use std::env;
use std::time::Duration;

/// Retry policy for transient transport failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), doubling each time
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Tunables for a [`CastController`](crate::CastController)
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Timeout for play, pause, stop and volume commands
    pub control_timeout: Duration,
    /// Timeout for a whole media load (launch, load, play)
    pub load_timeout: Duration,
    /// Timeout for opening a transport session
    pub connect_timeout: Duration,
    /// Commands that may wait behind the in-flight one
    pub queue_depth: usize,
    /// Snapshots buffered per observer
    pub observer_buffer: usize,
    /// How long an update waits on a full observer before detaching it
    pub observer_timeout: Duration,
    pub retry: RetryPolicy,
    /// App launched before loading media
    pub media_receiver_app: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            control_timeout: Duration::from_secs(5),
            load_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            queue_depth: 4,
            observer_buffer: 16,
            observer_timeout: Duration::from_millis(250),
            retry: RetryPolicy::default(),
            media_receiver_app: DEFAULT_MEDIA_RECEIVER.to_string(),
        }
    }
}

impl ControllerConfig {
    /// Read tunables from `CAST_*` environment variables, falling back to defaults
    ///
    /// | Variable | Unit |
    /// |---|---|
    /// | `CAST_CONTROL_TIMEOUT_MS` | ms |
    /// | `CAST_LOAD_TIMEOUT_MS` | ms |
    /// | `CAST_CONNECT_TIMEOUT_MS` | ms |
    /// | `CAST_QUEUE_DEPTH` | count |
    /// | `CAST_OBSERVER_BUFFER` | count |
    /// | `CAST_OBSERVER_TIMEOUT_MS` | ms |
    /// | `CAST_MAX_RETRIES` | count |
    /// | `CAST_INITIAL_BACKOFF_MS` | ms |
    /// | `CAST_MAX_BACKOFF_MS` | ms |
    /// | `CAST_MEDIA_RECEIVER_APP` | app id |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn parse<T: std::str::FromStr>(var: &str, default: T) -> T {
            env::var(var)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        }

        fn parse_millis(var: &str, default: Duration) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        }

        Self {
            control_timeout: parse_millis("CAST_CONTROL_TIMEOUT_MS", defaults.control_timeout),
            load_timeout: parse_millis("CAST_LOAD_TIMEOUT_MS", defaults.load_timeout),
            connect_timeout: parse_millis("CAST_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            queue_depth: parse("CAST_QUEUE_DEPTH", defaults.queue_depth),
            observer_buffer: parse("CAST_OBSERVER_BUFFER", defaults.observer_buffer),
            observer_timeout: parse_millis("CAST_OBSERVER_TIMEOUT_MS", defaults.observer_timeout),
            retry: RetryPolicy {
                max_retries: parse("CAST_MAX_RETRIES", defaults.retry.max_retries),
                initial_backoff: parse_millis("CAST_INITIAL_BACKOFF_MS", defaults.retry.initial_backoff),
                max_backoff: parse_millis("CAST_MAX_BACKOFF_MS", defaults.retry.max_backoff),
            },
            media_receiver_app: env::var("CAST_MEDIA_RECEIVER_APP")
                .unwrap_or(defaults.media_receiver_app),
        }
    }

    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_observer_timeout(mut self, timeout: Duration) -> Self {
        self.observer_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Timeout applied to a command when the caller gives none
    pub fn timeout_for(&self, command: &crate::command::Command) -> Duration {
        match command {
            crate::command::Command::LoadMedia { .. } => self.load_timeout,
            _ => self.control_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let retry = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(350));
    }

    #[test]
    fn load_uses_long_timeout() {
        let config = ControllerConfig::default();
        assert_eq!(config.timeout_for(&Command::Play), Duration::from_secs(5));
        assert_eq!(
            config.timeout_for(&Command::load_media("http://x", "T", None::<String>)),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn env_overrides_defaults() {
        env::set_var("CAST_QUEUE_DEPTH", "7");
        env::set_var("CAST_LOAD_TIMEOUT_MS", "1500");
        env::set_var("CAST_MAX_RETRIES", "not-a-number");
        let config = ControllerConfig::from_env();
        env::remove_var("CAST_QUEUE_DEPTH");
        env::remove_var("CAST_LOAD_TIMEOUT_MS");
        env::remove_var("CAST_MAX_RETRIES");

        assert_eq!(config.queue_depth, 7);
        assert_eq!(config.load_timeout, Duration::from_millis(1500));
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.control_timeout, Duration::from_secs(5));
    }
}
