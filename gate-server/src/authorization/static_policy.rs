use super::{AuthenticationLevel, Object, PolicyEngine, PolicyError, Subject};

/// Requires the same level for every object
#[derive(Debug, Clone)]
pub struct StaticPolicy {
    level: AuthenticationLevel,
}

impl StaticPolicy {
    pub fn new(level: AuthenticationLevel) -> Self {
        Self { level }
    }
}

#[async_trait::async_trait]
impl PolicyEngine for StaticPolicy {
    async fn required_level(
        &self,
        _subject: &Subject,
        _object: &Object,
    ) -> Result<AuthenticationLevel, PolicyError> {
        Ok(self.level)
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}
