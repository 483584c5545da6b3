//! Reconnect policies for the push channel.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::time::Duration;

use crate::errors::LinkError;

/// Controls whether and when the push channel reconnects after losing its
/// connection.
pub trait ReconnectPolicy: Send + Sync + 'static {
    fn should_reconnect(&self, ctx: &ReconnectContext) -> ControlFlow<(), Duration>;
}

/// Context passed to [`ReconnectPolicy::should_reconnect`] on each loss.
///
/// `fail_count` resets once a connection reaches the ready state.
pub struct ReconnectContext {
    pub fail_count:   NonZeroU32,
    pub slept_so_far: Duration,
    pub error:        LinkError,
}

/// Never reconnect; the first loss is terminal.
pub struct NoReconnect;
impl ReconnectPolicy for NoReconnect {
    fn should_reconnect(&self, _: &ReconnectContext) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Wait a fixed delay before every attempt.
pub struct FixedDelay {
    pub delay:        Duration,
    /// `None` retries forever.
    pub max_attempts: Option<NonZeroU32>,
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self { delay: Duration::from_secs(5), max_attempts: None }
    }
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay, max_attempts: None }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = NonZeroU32::new(n); self
    }
}

impl ReconnectPolicy for FixedDelay {
    fn should_reconnect(&self, ctx: &ReconnectContext) -> ControlFlow<(), Duration> {
        if let Some(max) = self.max_attempts {
            if ctx.fail_count > max {
                return ControlFlow::Break(());
            }
        }
        tracing::info!("[zpw-channel] {}; reconnecting in {:?}", ctx.error, self.delay);
        ControlFlow::Continue(self.delay)
    }
}
