use tracing::warn;

/// What happened to an overlay, as reported to the host UI.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusKind {
    Loading,
    Attached,
    Detached,
    Discarded,
    Failed,
}

/// One status line for the host.
///
/// `seq` is assigned by the bus and increases by one per event, so hosts can
/// poll with "give me everything after N".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub seq: u64,
    pub kind: StatusKind,
    pub overlay: String,
    pub message: String,
}

/// Events kept by a bus created with [`StatusBus::new`].
pub const DEFAULT_EVENT_LIMIT: usize = 256;

/// Ordered status log plus the single error display slot the host renders.
///
/// The slot holds the most recent failure message until the host dismisses it
/// or the same overlay later attaches successfully. Only the newest
/// `event_limit` events are kept; sequence numbers keep counting.
#[derive(Debug)]
pub struct StatusBus {
    next_seq: u64,
    events: Vec<StatusEvent>,
    event_limit: usize,
    error_slot: Option<(String, String)>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::with_event_limit(DEFAULT_EVENT_LIMIT)
    }
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_limit(event_limit: usize) -> Self {
        Self {
            next_seq: 0,
            events: Vec::new(),
            event_limit: event_limit.max(1),
            error_slot: None,
        }
    }

    pub fn emit(&mut self, kind: StatusKind, overlay: impl Into<String>, message: impl Into<String>) {
        let overlay = overlay.into();
        let message = message.into();

        match kind {
            StatusKind::Failed => {
                warn!(overlay = %overlay, "{message}");
                self.error_slot = Some((overlay.clone(), message.clone()));
            }
            StatusKind::Attached => {
                if self
                    .error_slot
                    .as_ref()
                    .is_some_and(|(failed, _)| *failed == overlay)
                {
                    self.error_slot = None;
                }
            }
            _ => {}
        }

        self.events.push(StatusEvent {
            seq: self.next_seq,
            kind,
            overlay,
            message,
        });
        self.next_seq += 1;

        if self.events.len() > self.event_limit {
            let excess = self.events.len() - self.event_limit;
            self.events.drain(..excess);
        }
    }

    /// The event `emit` just recorded.
    pub fn last(&self) -> Option<&StatusEvent> {
        self.events.last()
    }

    /// Message for the host's error display, if any.
    pub fn error_slot(&self) -> Option<&str> {
        self.error_slot.as_ref().map(|(_, msg)| msg.as_str())
    }

    pub fn dismiss_error(&mut self) {
        self.error_slot = None;
    }

    pub fn events(&self) -> &[StatusEvent] {
        &self.events
    }

    pub fn events_since(&self, seq: u64) -> &[StatusEvent] {
        let start = self.events.partition_point(|e| e.seq < seq);
        &self.events[start..]
    }

    pub fn drain(&mut self) -> Vec<StatusEvent> {
        std::mem::take(&mut self.events)
    }
}
