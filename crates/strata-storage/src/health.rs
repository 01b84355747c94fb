//! Account health check

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::backend::ChunkBackend;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountHealth {
    pub account_id: String,
    pub reachable: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Verify the account is reachable by asking for its capacity.
pub async fn check_health(backend: &dyn ChunkBackend) -> AccountHealth {
    let started = Instant::now();
    let result = backend.capacity().await;
    let latency_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => AccountHealth {
            account_id: backend.account_id().to_string(),
            reachable: true,
            latency_ms,
            error: None,
        },
        Err(e) => {
            tracing::warn!(account = %backend.account_id(), error = %e, "storage health check failed");
            AccountHealth {
                account_id: backend.account_id().to_string(),
                reachable: false,
                latency_ms,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::build_memory_operator;
    use crate::OpendalBackend;

    #[tokio::test]
    async fn test_memory_account_is_healthy() {
        let b = OpendalBackend::new(build_memory_operator().unwrap(), "m", "m", 10);
        let health = check_health(&b).await;
        assert!(health.reachable);
        assert!(health.error.is_none());
    }
}
