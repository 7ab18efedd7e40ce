use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::request::Generation;

/// Handle for one in-flight load.
///
/// Carries the cancellation token the transport should watch and the
/// generation the completion handler checks before touching the map.
#[derive(Debug, Clone)]
pub struct LoadTicket<S> {
    slot: S,
    generation: Generation,
    token: CancellationToken,
}

impl<S> LoadTicket<S> {
    pub fn slot(&self) -> &S {
        &self.slot
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug)]
struct SlotState {
    generation: Generation,
    /// `Some` while a load for this generation is outstanding.
    token: Option<CancellationToken>,
}

/// Tracks the latest transition per slot ("latest transition wins").
///
/// A slot is whatever groups mutually superseding loads: the exclusive overlay
/// group shares one slot, each independent overlay has its own. At most one
/// uncancelled load exists per slot at any time.
#[derive(Debug)]
pub struct InflightLoads<S: Ord> {
    next_generation: u64,
    slots: BTreeMap<S, SlotState>,
}

impl<S: Ord + Clone> Default for InflightLoads<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Ord + Clone> InflightLoads<S> {
    pub fn new() -> Self {
        Self {
            next_generation: 1,
            slots: BTreeMap::new(),
        }
    }

    fn bump(&mut self) -> Generation {
        let generation = Generation(self.next_generation);
        self.next_generation += 1;
        generation
    }

    /// Start a new load for `slot`, cancelling the slot's previous load.
    pub fn begin(&mut self, slot: S) -> LoadTicket<S> {
        let generation = self.bump();
        let token = CancellationToken::new();
        let previous = self.slots.insert(
            slot.clone(),
            SlotState {
                generation,
                token: Some(token.clone()),
            },
        );
        if let Some(prev) = previous.and_then(|p| p.token) {
            prev.cancel();
        }
        LoadTicket {
            slot,
            generation,
            token,
        }
    }

    /// Invalidate the slot without starting a new load.
    ///
    /// Returns `true` if an outstanding load was cancelled.
    pub fn supersede(&mut self, slot: &S) -> bool {
        let generation = self.bump();
        let Some(state) = self.slots.get_mut(slot) else {
            return false;
        };
        state.generation = generation;
        match state.token.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a completion for `ticket` may still be applied.
    pub fn is_current(&self, ticket: &LoadTicket<S>) -> bool {
        !ticket.token.is_cancelled()
            && self
                .slots
                .get(&ticket.slot)
                .is_some_and(|s| s.generation == ticket.generation && s.token.is_some())
    }

    /// Mark the ticket's load as finished.
    ///
    /// Returns `false` for a stale ticket, in which case nothing changes.
    pub fn settle(&mut self, ticket: &LoadTicket<S>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.release(ticket);
        true
    }

    /// Forget the ticket's load if it is still the slot's latest, even when
    /// its token was cancelled from outside.
    pub fn release(&mut self, ticket: &LoadTicket<S>) {
        if let Some(state) = self.slots.get_mut(&ticket.slot) {
            if state.generation == ticket.generation {
                state.token = None;
            }
        }
    }

    pub fn is_pending(&self, slot: &S) -> bool {
        self.slots.get(slot).is_some_and(|s| s.token.is_some())
    }

    pub fn pending_len(&self) -> usize {
        self.slots.values().filter(|s| s.token.is_some()).count()
    }

    /// Cancel every outstanding load. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let slots: Vec<S> = self.slots.keys().cloned().collect();
        slots.iter().filter(|slot| self.supersede(slot)).count()
    }
}
