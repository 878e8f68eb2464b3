use std::time::Duration;

/// Tuning for realtime subscriptions, sends and typing indicators.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Reconnect attempts per outage before settling in `Disconnected`.
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
    pub max_backoff: Duration,
    /// A connection that stayed up this long resets the reconnect budget.
    pub stable_connection: Duration,
    /// Total attempts for one `send_message`, including the first.
    pub send_attempts: u32,
    pub send_backoff: Duration,
    /// Typing reverts to false after this much input inactivity.
    pub typing_idle: Duration,
    /// Messages fetched when a thread opens.
    pub history_limit: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            stable_connection: Duration::from_secs(30),
            send_attempts: 3,
            send_backoff: Duration::from_millis(250),
            typing_idle: Duration::from_secs(3),
            history_limit: 100,
        }
    }
}

impl ChannelConfig {
    /// Exponential backoff before reconnect `attempt` (1-based), capped.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        exponential(self.reconnect_backoff, attempt).min(self.max_backoff)
    }

    pub fn send_delay(&self, attempt: u32) -> Duration {
        exponential(self.send_backoff, attempt).min(self.max_backoff)
    }
}

fn exponential(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << shift)
}
