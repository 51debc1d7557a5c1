use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tronpay_core::PaymentIntent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: String,
    pub intent_id: String,
    pub user_id: String,
    pub status: String,
    pub record_hash: Option<String>,
    pub tx_id: Option<String>,
    pub amount: Option<i64>,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: &str, intent: &PaymentIntent) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            intent_id: intent.id.to_string(),
            user_id: intent.user_id.clone(),
            status: intent.status.to_string(),
            record_hash: Some(intent.fingerprint()),
            tx_id: intent.tx_id.clone(),
            amount: None,
            error: None,
        }
    }

    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Append-only JSON-lines trail of intent transitions.
#[derive(Debug, Default)]
pub struct AuditLog {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Failures are logged and swallowed; the trail never blocks a transition.
    pub fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.append(event) {
            tracing::warn!(event_type = %event.event_type, intent_id = %event.intent_id, error = %e, "Failed to write audit event");
        }
    }

    fn append(&self, event: &AuditEvent) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)?;
        tracing::debug!(event_type = %event.event_type, intent_id = %event.intent_id, "Audit event written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::new(Some(path.clone()));
        let intent = PaymentIntent::new(
            "9",
            "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
            5,
            1.0,
            0,
            Utc::now(),
            chrono::Duration::hours(1),
        );

        log.record(&AuditEvent::new("intent_created", &intent));
        log.record(&AuditEvent::new("intent_expired", &intent).with_error("late".into()));

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<AuditEvent> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].event_type, "intent_created");
        assert_eq!(lines[1].error.as_deref(), Some("late"));
        assert_eq!(lines[0].record_hash.as_deref(), Some(intent.fingerprint().as_str()));
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let log = AuditLog::disabled();
        let intent = PaymentIntent::new("9", "T", 5, 1.0, 0, Utc::now(), chrono::Duration::hours(1));
        log.record(&AuditEvent::new("intent_created", &intent));
    }
}
