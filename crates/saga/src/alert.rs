//! Critical alerting for unrecoverable compensation failures.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{SagaId, UserId};
use serde::Serialize;

/// Payload for the escalation channel.
///
/// Carries enough identifiers for an operator to locate and manually
/// reconcile the affected rows.
#[derive(Debug, Clone, Serialize)]
pub struct CriticalAlert {
    pub saga_id: SagaId,
    pub step: String,
    pub requester_id: UserId,
    pub receiver_id: UserId,
    pub reason: String,
}

/// Outbound alerting hook, invoked only when a compensation fails.
#[async_trait]
pub trait CriticalAlerter: Send + Sync {
    /// Raises a critical alert for manual intervention.
    async fn send_critical_alert(&self, alert: &CriticalAlert);
}

/// Alerter that writes to the structured log at error level.
#[derive(Debug, Clone, Default)]
pub struct TracingAlerter;

impl TracingAlerter {
    /// Creates a new tracing-backed alerter.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CriticalAlerter for TracingAlerter {
    async fn send_critical_alert(&self, alert: &CriticalAlert) {
        tracing::error!(
            saga_id = %alert.saga_id,
            step = %alert.step,
            requester_id = %alert.requester_id,
            receiver_id = %alert.receiver_id,
            reason = %alert.reason,
            "CRITICAL: saga compensation failed, manual reconciliation required"
        );
    }
}

/// In-memory alerter for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAlerter {
    alerts: Arc<RwLock<Vec<CriticalAlert>>>,
}

impl InMemoryAlerter {
    /// Creates a new in-memory alerter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of alerts raised.
    pub fn alert_count(&self) -> usize {
        self.alerts.read().unwrap().len()
    }

    /// Returns a copy of every alert raised.
    pub fn alerts(&self) -> Vec<CriticalAlert> {
        self.alerts.read().unwrap().clone()
    }
}

#[async_trait]
impl CriticalAlerter for InMemoryAlerter {
    async fn send_critical_alert(&self, alert: &CriticalAlert) {
        self.alerts.write().unwrap().push(alert.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_alerter_records_alerts() {
        let alerter = InMemoryAlerter::new();
        let alert = CriticalAlert {
            saga_id: SagaId::new(),
            step: "accept_request".to_string(),
            requester_id: UserId::new(),
            receiver_id: UserId::new(),
            reason: "restore failed".to_string(),
        };

        alerter.send_critical_alert(&alert).await;
        alerter.send_critical_alert(&alert).await;

        assert_eq!(alerter.alert_count(), 2);
        assert_eq!(alerter.alerts()[0].step, "accept_request");
    }
}
