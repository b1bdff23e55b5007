use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

use crate::store::now_ms;

/// One privileged action, kept for operator inspection.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: i64,
    pub actor: String,
    pub action: String,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Bounded in-memory ring of audit entries. Recording never fails and
/// never blocks a request beyond the mutex; every entry is also emitted
/// as a structured log line.
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn record(
        &self,
        actor: &str,
        action: &str,
        resource: &str,
        detail: Option<serde_json::Value>,
    ) {
        tracing::info!(actor, action, resource, "audit");
        let entry = AuditEntry {
            timestamp: now_ms(),
            actor: actor.to_owned(),
            action: action.to_owned(),
            resource: resource.to_owned(),
            detail,
        };
        let mut entries = self.entries.lock().expect("audit log poisoned");
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock().expect("audit log poisoned");
        entries.iter().rev().take(n).rev().cloned().collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}
