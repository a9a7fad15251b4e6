//! Retry policies for optimistic write loops
//!
//! A write loop consults its [`RetryPolicy`] after every failed commit. The
//! policy decides whether to try again and may wait before answering, which
//! is where backoff lives. The default used by `OccBox::write` is [`Spin`]:
//! unbounded retries with a short user-space backoff.
//!
//! ## Built-in policies
//!
//! | Policy | Gives up | Waits with |
//! |--------|----------|------------|
//! | [`Spin`] | never | `Backoff::snooze` |
//! | [`Bounded`] | after `max_attempts` | `Backoff::spin` |
//! | [`ExponentialBackoff`] | optionally | `thread::sleep`, doubling to a cap, optional jitter |
//!
//! Any `FnMut(u32) -> bool` is also a policy.
//!
//! ## Configuration
//!
//! [`RetryConfig`] describes a policy as data (serde) and builds it with
//! [`RetryConfig::into_policy`].

use crossbeam::utils::Backoff;
use occbox_core::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Decides whether a conflicted write loop tries again
pub trait RetryPolicy {
    /// Called after the `attempt`-th failed commit (starting at 1).
    ///
    /// Return `false` to stop the loop.
    fn on_conflict(&mut self, attempt: u32) -> bool;
}

impl<F> RetryPolicy for F
where
    F: FnMut(u32) -> bool,
{
    fn on_conflict(&mut self, attempt: u32) -> bool {
        self(attempt)
    }
}

/// Retry forever, snoozing between attempts
#[derive(Debug, Default)]
pub struct Spin {
    backoff: Backoff,
}

impl Spin {
    /// Create an unbounded spinning policy
    pub fn new() -> Self {
        Self::default()
    }
}

impl RetryPolicy for Spin {
    fn on_conflict(&mut self, _attempt: u32) -> bool {
        self.backoff.snooze();
        true
    }
}

/// Allow at most `max_attempts` commit attempts in total
#[derive(Debug)]
pub struct Bounded {
    max_attempts: u32,
    backoff: Backoff,
}

impl Bounded {
    /// Create a bounded policy. A budget of zero is treated as one attempt.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::new(),
        }
    }

    /// Total attempts allowed
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl RetryPolicy for Bounded {
    fn on_conflict(&mut self, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        self.backoff.spin();
        true
    }
}

/// Sleep between attempts, doubling the delay up to a cap
///
/// With jitter enabled each sleep is extended by a random amount of up to
/// half the current delay.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
    current: Duration,
}

impl ExponentialBackoff {
    /// Start at `base`, never sleep longer than `cap` (before jitter)
    ///
    /// A zero `base` never grows: the policy then retries without sleeping.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            max_attempts: None,
            jitter: false,
            current: base,
        }
    }

    /// Give up once `max_attempts` commits have conflicted
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Enable or disable random jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay the next conflict will sleep for, before jitter
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// Restart from the base delay
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    fn next_delay(&mut self) -> Duration {
        let mut delay = self.current;
        if self.jitter {
            let half = (delay.as_micros() / 2) as u64;
            if half > 0 {
                delay += Duration::from_micros(rand::thread_rng().gen_range(0..=half));
            }
        }
        self.current = self.current.saturating_mul(2).min(self.cap);
        delay
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn on_conflict(&mut self, attempt: u32) -> bool {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return false;
            }
        }
        let delay = self.next_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        true
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Retry policy described as data
///
/// # Example
///
/// ```
/// use occbox_concurrency::RetryConfig;
///
/// let config: RetryConfig = serde_json::from_str(
///     r#"{"strategy": "exponential", "base_micros": 50, "cap_micros": 5000, "jitter": true}"#,
/// ).unwrap();
/// let policy = config.into_policy().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RetryConfig {
    /// Unbounded retries, see [`Spin`]
    Spin,
    /// See [`Bounded`]
    Bounded {
        /// Total commit attempts allowed
        max_attempts: u32,
    },
    /// See [`ExponentialBackoff`]
    Exponential {
        /// First delay, in microseconds
        base_micros: u64,
        /// Largest delay, in microseconds
        cap_micros: u64,
        /// Give up after this many attempts; unbounded if absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_attempts: Option<u32>,
        /// Randomise each delay by up to half
        #[serde(default)]
        jitter: bool,
    },
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::Spin
    }
}

impl RetryConfig {
    /// Create a new config builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Reject configurations that cannot describe a working policy
    pub fn validate(&self) -> Result<()> {
        match self {
            RetryConfig::Spin => Ok(()),
            RetryConfig::Bounded { max_attempts } => {
                if *max_attempts == 0 {
                    return Err(Error::InvalidConfig(
                        "max_attempts must be at least 1".to_string(),
                    ));
                }
                Ok(())
            }
            RetryConfig::Exponential {
                base_micros,
                cap_micros,
                max_attempts,
                ..
            } => {
                if *base_micros == 0 && *cap_micros > 0 {
                    return Err(Error::InvalidConfig(
                        "base delay must be non-zero when the cap is".to_string(),
                    ));
                }
                if base_micros > cap_micros {
                    return Err(Error::InvalidConfig(format!(
                        "base delay {}us exceeds cap {}us",
                        base_micros, cap_micros
                    )));
                }
                if *max_attempts == Some(0) {
                    return Err(Error::InvalidConfig(
                        "max_attempts must be at least 1".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Build the described policy
    pub fn into_policy(self) -> Result<Box<dyn RetryPolicy + Send>> {
        self.validate()?;
        let policy: Box<dyn RetryPolicy + Send> = match self {
            RetryConfig::Spin => Box::new(Spin::new()),
            RetryConfig::Bounded { max_attempts } => Box::new(Bounded::new(max_attempts)),
            RetryConfig::Exponential {
                base_micros,
                cap_micros,
                max_attempts,
                jitter,
            } => {
                let mut policy = ExponentialBackoff::new(
                    Duration::from_micros(base_micros),
                    Duration::from_micros(cap_micros),
                )
                .with_jitter(jitter);
                if let Some(max) = max_attempts {
                    policy = policy.with_max_attempts(max);
                }
                Box::new(policy)
            }
        };
        Ok(policy)
    }
}

/// Builder for RetryConfig
#[derive(Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Retry forever (the default)
    pub fn spin(mut self) -> Self {
        self.config = RetryConfig::Spin;
        self
    }

    /// Exponential backoff between `base` and `cap`
    pub fn exponential(mut self, base: Duration, cap: Duration) -> Self {
        let max_attempts = self.attempt_budget();
        self.config = RetryConfig::Exponential {
            base_micros: saturating_micros(base),
            cap_micros: saturating_micros(cap),
            max_attempts,
            jitter: false,
        };
        self
    }

    /// Cap the total number of attempts
    ///
    /// Turns a spinning config into a bounded one.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        if let RetryConfig::Exponential {
            max_attempts: max, ..
        } = &mut self.config
        {
            *max = Some(max_attempts);
        } else {
            self.config = RetryConfig::Bounded { max_attempts };
        }
        self
    }

    /// Randomise exponential delays (ignored by other strategies)
    pub fn jitter(mut self, enabled: bool) -> Self {
        if let RetryConfig::Exponential { jitter, .. } = &mut self.config {
            *jitter = enabled;
        }
        self
    }

    /// Validate and return the config
    pub fn build(self) -> Result<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    fn attempt_budget(&self) -> Option<u32> {
        match &self.config {
            RetryConfig::Spin => None,
            RetryConfig::Bounded { max_attempts } => Some(*max_attempts),
            RetryConfig::Exponential { max_attempts, .. } => *max_attempts,
        }
    }
}

/// Whole microseconds in `d`, saturating at `u64::MAX`
fn saturating_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
