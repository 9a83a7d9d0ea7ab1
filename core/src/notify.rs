//! Notification sinks.
//!
//! Delivery is fire-and-forget from the engine's side: a sink must not fail the
//! caller, and delivery guarantees belong to the sink. The durable record is the
//! `event_log` outbox.

use crate::event::{Channel, TrustEvent};
use parking_lot::Mutex;

pub trait NotificationSink: Send + Sync {
    /// Deliver an event addressed to the subject.
    fn notify(&self, subject_id: &str, event: &TrustEvent);

    /// Deliver an event to the admin-facing channel.
    fn notify_admin(&self, event: &TrustEvent) {
        let _ = event;
    }
}

/// Writes every event to the log facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, subject_id: &str, event: &TrustEvent) {
        log::info!("notify subject={subject_id} event={}", event.type_name());
    }

    fn notify_admin(&self, event: &TrustEvent) {
        log::warn!(
            "admin alert subject={} event={}",
            event.subject_id(),
            event.type_name()
        );
    }
}

/// Keeps every delivered event in memory, in delivery order.
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<(Channel, TrustEvent)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(Channel, TrustEvent)> {
        self.delivered.lock().clone()
    }

    pub fn for_subject(&self, subject_id: &str) -> Vec<TrustEvent> {
        self.delivered
            .lock()
            .iter()
            .filter(|(channel, e)| *channel == Channel::Subject && e.subject_id() == subject_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn admin_events(&self) -> Vec<TrustEvent> {
        self.delivered
            .lock()
            .iter()
            .filter(|(channel, _)| *channel == Channel::Admin)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.delivered.lock().clear();
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, _subject_id: &str, event: &TrustEvent) {
        self.delivered.lock().push((Channel::Subject, event.clone()));
    }

    fn notify_admin(&self, event: &TrustEvent) {
        self.delivered.lock().push((Channel::Admin, event.clone()));
    }
}
