use std::sync::{Arc, Mutex, PoisonError};

/// Single-slot hand-off from the event ingress to the chat client.
///
/// `post` overwrites whatever is unread, so a burst of events collapses to the
/// latest one. `drain` takes the value out atomically; an empty slot is the
/// normal case and never blocks.
#[derive(Clone, Debug, Default)]
pub struct NotificationMailbox {
    slot: Arc<Mutex<Option<String>>>,
}

impl NotificationMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, text: impl Into<String>) {
        let text = text.into();
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(text) {
            tracing::debug!(dropped = %previous, "Unread notification overwritten");
        }
    }

    pub fn drain(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Puts back a drained notification that could not be delivered, unless a
    /// newer one has been posted in the meantime.
    pub fn restore(&self, text: String) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(text);
        true
    }
}
