use std::time::Duration;

/// What a failed attempt asks the caller to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Credential is out of quota: switch keys, then try again.
    RotateAndRetry,
    /// Backend is overloaded: wait longer, then try again with the same key.
    DelayAndRetry,
    Abort,
}

pub trait Retryable {
    fn retry_action(&self) -> RetryAction;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    Rotate(Duration),
    Wait(Duration),
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls allowed, first attempt included.
    pub max_attempts: u32,
    pub quota_delay: Duration,
    pub unavailable_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            quota_delay: Duration::from_secs(2),
            unavailable_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget as the default policy, without sleeping.
    pub fn immediate() -> Self {
        Self {
            quota_delay: Duration::ZERO,
            unavailable_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Decide what follows failed attempt number `attempt` (1-based).
    pub fn next_step<E: Retryable>(&self, attempt: u32, error: &E) -> RetryStep {
        if attempt >= self.max_attempts {
            return RetryStep::GiveUp;
        }

        match error.retry_action() {
            RetryAction::RotateAndRetry => RetryStep::Rotate(self.quota_delay),
            RetryAction::DelayAndRetry => RetryStep::Wait(self.unavailable_delay),
            RetryAction::Abort => RetryStep::GiveUp,
        }
    }
}
