use std::time::Duration;

/// Retry knobs of a protocol session.
///
/// Two nested loops use these values: the transport loop repeats one HTTP
/// exchange (`transport_retries` extra tries, `retry_delay` apart), the
/// correlation loop repeats the whole round trip up to `max_attempts` times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Correlation attempts per `ask` (>= 1).
    pub max_attempts: u32,
    /// Extra transport tries after the first one.
    pub transport_retries: u32,
    /// Fixed pause between transport tries.
    pub retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            transport_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}
