use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::audit::{AuditAction, NewAuditEvent};
use crate::store::AttendanceStore;

/// Append-only audit trail. Written after the audited change has committed;
/// a failed write is logged and does not undo the change.
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AttendanceStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AttendanceStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        actor_id: Option<u64>,
        action: AuditAction,
        subject_kind: &'static str,
        subject_id: Option<u64>,
        detail: Value,
        at: DateTime<Utc>,
    ) {
        tracing::info!(
            target: "audit",
            action = %action,
            actor_id,
            subject_kind,
            subject_id,
            %detail,
            "Audit event"
        );

        let event = NewAuditEvent {
            actor_id,
            action,
            subject_kind,
            subject_id,
            detail,
            created_at: at,
        };
        if let Err(e) = self.store.append_audit(event).await {
            tracing::error!(error = %e, action = %action, subject_id, "Failed to persist audit event");
        }
    }
}
