//! Debounced forwarding of visual-context updates to the voice agent.
//!
//! The debouncer consumes bus snapshots and forwards a message when a
//! found identity is new (by ID) or when the notify interval has elapsed
//! since the last forward for the same identity. Its `(id, time)` state is
//! private and separate from the bus slot.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::bus::{Subscription, VisualContextBus};
use crate::types::VisualSnapshot;

/// Default minimum spacing between forwards for the same identity.
pub const DEFAULT_NOTIFY_INTERVAL: Duration = Duration::from_secs(30);

/// Placeholder-name prefix for auto-created identities.
const PLACEHOLDER_PREFIX: &str = "New Contact";

struct LastForward {
    id: String,
    at: Instant,
}

/// Decides whether a snapshot is forwarded to the agent.
pub struct NotificationDebouncer {
    interval: Duration,
    last: Mutex<Option<LastForward>>,
}

impl NotificationDebouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Apply the debounce rule at time `now`; returns the message to
    /// forward, if any, and records the forward.
    ///
    /// Forward when the snapshot carries a found identity AND (no prior
    /// forward, OR a different identity than last time, OR at least the
    /// notify interval has elapsed for the same identity). An identity
    /// change always overrides elapsed-time suppression.
    pub fn decide(&self, snapshot: &VisualSnapshot, now: Instant) -> Option<String> {
        if !snapshot.found {
            return None;
        }
        let id = snapshot.id.as_deref()?;

        let mut last = self.last.lock().expect("debouncer lock poisoned");
        let forward = match last.as_ref() {
            None => true,
            Some(prev) if prev.id != id => true,
            Some(prev) => now.duration_since(prev.at) >= self.interval,
        };
        if !forward {
            return None;
        }

        *last = Some(LastForward {
            id: id.to_string(),
            at: now,
        });
        Some(agent_message(snapshot, id))
    }
}

/// Build the instructional message for the agent.
///
/// Placeholder identities get the observe-and-infer instruction; known
/// identities get a silent-enrichment brief.
fn agent_message(snapshot: &VisualSnapshot, id: &str) -> String {
    let name = snapshot.name.as_deref().unwrap_or("Unknown Person");
    let is_new_contact = name.starts_with(PLACEHOLDER_PREFIX)
        || snapshot.relationship_status.as_deref() == Some("New");

    if is_new_contact {
        format!(
            "System Update: A new face has been detected. Identity ID: {id}. \
             The identity currently has placeholder name \"{name}\" and status \"New\". \
             Observe conversations silently and infer the person's name and relationship from context. \
             Use 'update_identity' tool silently when you have high confidence. \
             Do NOT ask the user questions."
        )
    } else {
        let status = snapshot.relationship_status.as_deref().unwrap_or("Unknown");
        format!(
            "System Update: The user is looking at {name}. Relationship: {status}. \
             Identity ID: {id}. Observe and infer any new information from conversations."
        )
    }
}

/// Wire a debouncer between the bus and a forwarding channel.
///
/// The bus fan-out is synchronous, so the subscriber only runs the decision
/// and a non-blocking send; a full channel drops the message rather than
/// stalling the detection path.
pub fn attach_debouncer(
    bus: &Arc<VisualContextBus>,
    debouncer: Arc<NotificationDebouncer>,
    tx: mpsc::Sender<String>,
) -> Subscription {
    bus.subscribe(move |snapshot| {
        if let Some(message) = debouncer.decide(snapshot, Instant::now()) {
            if tx.try_send(message).is_err() {
                tracing::warn!("agent notification channel full; dropping update");
            }
        }
    })
}
