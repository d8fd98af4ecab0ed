use super::InfrastructureError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Point in time after which collaborator calls of a request are abandoned
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    /// Starts a deadline `budget` from now. Budgets past the clock's range
    /// are capped at roughly thirty years.
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(budget)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self { expires_at }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Runs `operation` within the remaining budget
    pub async fn run<F: Future>(
        &self,
        collaborator: &'static str,
        operation: F,
    ) -> Result<F::Output, InfrastructureError> {
        timeout_at(self.expires_at, operation)
            .await
            .map_err(|_| InfrastructureError::Timeout(collaborator))
    }
}
