use std::sync::Arc;

use catalog::{Locale, OverlayKey};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use runtime::{StatusBus, StatusEvent, StatusKind};
use streaming::{BoxFuture, FetchResult, StyleFetcher};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::desired::DesiredState;
use crate::error::OverlayError;
use crate::manager::{LoadOutcome, OverlayManager, PendingLoad};
use crate::registry::MapArtifactRegistry;

/// A user interaction delivered to [`OverlayDriver::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleEvent {
    Exclusive(OverlayKey),
    Toggle(OverlayKey),
    SetIndependent(OverlayKey, bool),
    Terrain(bool),
    DismissError,
    /// Remove every overlay from the map and forget all state.
    Teardown,
}

type InflightFetch = BoxFuture<'static, (PendingLoad, FetchResult)>;

enum Step {
    Event(Option<ToggleEvent>),
    Loaded(PendingLoad, FetchResult),
}

/// Owns the map and the manager, runs fetches concurrently and feeds their
/// results back in completion order.
///
/// Everything that touches the map happens on the task driving this value,
/// so map mutations never interleave. Hosts that hand the driver to
/// [`run`](Self::run) follow its status through [`subscribe`](Self::subscribe)
/// and [`watch_errors`](Self::watch_errors).
pub struct OverlayDriver<M> {
    manager: OverlayManager,
    map: M,
    desired: DesiredState,
    fetcher: Arc<dyn StyleFetcher>,
    inflight: FuturesUnordered<InflightFetch>,
    status: StatusBus,
    status_feed: Option<mpsc::Sender<StatusEvent>>,
    error_slot: watch::Sender<Option<String>>,
    locale: Locale,
}

impl<M: MapArtifactRegistry> OverlayDriver<M> {
    pub fn new(manager: OverlayManager, map: M, fetcher: Arc<dyn StyleFetcher>) -> Self {
        Self {
            manager,
            map,
            desired: DesiredState::new(),
            fetcher,
            inflight: FuturesUnordered::new(),
            status: StatusBus::new(),
            status_feed: None,
            error_slot: watch::channel(None).0,
            locale: Locale::default(),
        }
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    pub fn manager(&self) -> &OverlayManager {
        &self.manager
    }

    pub fn desired(&self) -> &DesiredState {
        &self.desired
    }

    pub fn status(&self) -> &StatusBus {
        &self.status
    }

    /// Receive every status event from now on.
    ///
    /// Events are dropped with a warning while the receiver is full. A new
    /// subscription replaces the previous one.
    pub fn subscribe(&mut self, capacity: usize) -> mpsc::Receiver<StatusEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.status_feed = Some(tx);
        rx
    }

    /// Follow the error display slot.
    pub fn watch_errors(&self) -> watch::Receiver<Option<String>> {
        self.error_slot.subscribe()
    }

    pub fn dismiss_error(&mut self) {
        self.status.dismiss_error();
        self.sync_error_slot();
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    pub fn into_map(self) -> M {
        self.map
    }

    /// Radio selection changed.
    pub fn on_exclusive_change(&mut self, key: &str) -> Result<(), OverlayError> {
        self.desired
            .select_exclusive(self.manager.catalog(), key)
            .inspect_err(|err| self.report_error(err))?;
        let pending = self.manager.reconcile_exclusive(&mut self.map, key);
        self.dispatch(pending)
    }

    /// Checkbox clicked. Returns the overlay's new state.
    pub fn on_independent_toggle(&mut self, key: &str) -> Result<bool, OverlayError> {
        let active = self
            .desired
            .toggle_independent(self.manager.catalog(), key)
            .inspect_err(|err| self.report_error(err))?;
        self.apply_independent(key, active)?;
        Ok(active)
    }

    pub fn set_independent(&mut self, key: &str, active: bool) -> Result<(), OverlayError> {
        self.desired
            .set_independent(self.manager.catalog(), key, active)
            .inspect_err(|err| self.report_error(err))?;
        self.apply_independent(key, active)
    }

    pub fn on_terrain_toggle(&mut self, enabled: bool) -> Result<(), OverlayError> {
        let Some(key) = self.manager.terrain_key().cloned() else {
            let err = OverlayError::UnknownOverlay("terrain".to_string());
            self.report_error(&err);
            return Err(err);
        };
        self.set_independent(key.as_str(), enabled)
    }

    /// Remove every overlay from the map, cancel every load and forget all
    /// state. Later events start from an empty selection.
    pub fn teardown(&mut self) {
        self.manager.remove_all(&mut self.map);
        self.desired.clear();
        self.inflight.clear();
    }

    fn publish(&mut self, kind: StatusKind, overlay: &str, message: impl Into<String>) {
        self.status.emit(kind, overlay, message);
        let closed = match (&self.status_feed, self.status.last()) {
            (Some(feed), Some(event)) => match feed.try_send(event.clone()) {
                Ok(()) => false,
                Err(TrySendError::Full(event)) => {
                    warn!(seq = event.seq, "status subscriber is full, dropping event");
                    false
                }
                Err(TrySendError::Closed(_)) => true,
            },
            _ => false,
        };
        if closed {
            self.status_feed = None;
        }
        self.sync_error_slot();
    }

    fn sync_error_slot(&self) {
        let current = self.status.error_slot().map(String::from);
        self.error_slot.send_if_modified(|slot| {
            if *slot == current {
                return false;
            }
            *slot = current;
            true
        });
    }

    fn apply_independent(&mut self, key: &str, active: bool) -> Result<(), OverlayError> {
        let pending = self
            .manager
            .reconcile_independent(&mut self.map, key, active);
        if !active && pending.is_ok() {
            self.publish(StatusKind::Detached, key, "");
        }
        self.dispatch(pending)
    }

    fn dispatch(
        &mut self,
        pending: Result<Option<PendingLoad>, OverlayError>,
    ) -> Result<(), OverlayError> {
        match pending {
            Ok(Some(load)) => {
                let url = load.url().to_string();
                self.publish(StatusKind::Loading, load.key().as_str(), url);
                self.spawn(load);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                self.report_error(&err);
                Err(err)
            }
        }
    }

    fn spawn(&mut self, load: PendingLoad) {
        let fetcher = Arc::clone(&self.fetcher);
        self.inflight.push(Box::pin(async move {
            let result = fetcher.fetch(load.url(), load.token()).await;
            (load, result)
        }));
    }

    fn report_error(&mut self, err: &OverlayError) {
        let message = self.locale.load_failed(&err.to_string());
        self.publish(StatusKind::Failed, err.key(), message);
    }

    fn report(&mut self, outcome: &LoadOutcome) {
        match outcome {
            LoadOutcome::Attached {
                key,
                sources,
                layers,
            } => self.publish(
                StatusKind::Attached,
                key.as_str(),
                format!("{sources} sources, {layers} layers"),
            ),
            LoadOutcome::Discarded { key } => {
                self.publish(StatusKind::Discarded, key.as_str(), "superseded")
            }
            LoadOutcome::Failed { error, .. } => self.report_error(error),
        }
    }

    fn finish(&mut self, load: PendingLoad, result: FetchResult) -> LoadOutcome {
        let outcome = self.manager.complete(&mut self.map, load, result);
        self.report(&outcome);
        outcome
    }

    /// Wait for the next fetch to finish and apply it. `None` when nothing is
    /// in flight.
    pub async fn next_completion(&mut self) -> Option<LoadOutcome> {
        let (load, result) = self.inflight.next().await?;
        Some(self.finish(load, result))
    }

    /// Drain every fetch in flight.
    pub async fn settle(&mut self) -> Vec<LoadOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.next_completion().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn handle(&mut self, event: ToggleEvent) -> Result<(), OverlayError> {
        debug!(?event, "toggle event");
        match event {
            ToggleEvent::Exclusive(key) => self.on_exclusive_change(key.as_str()),
            ToggleEvent::Toggle(key) => self.on_independent_toggle(key.as_str()).map(|_| ()),
            ToggleEvent::SetIndependent(key, active) => self.set_independent(key.as_str(), active),
            ToggleEvent::Terrain(enabled) => self.on_terrain_toggle(enabled),
            ToggleEvent::DismissError => {
                self.dismiss_error();
                Ok(())
            }
            ToggleEvent::Teardown => {
                self.teardown();
                Ok(())
            }
        }
    }

    /// Process events until the sender side closes, applying fetch results
    /// as they arrive, then drain what is still in flight.
    pub async fn run(mut self, mut events: mpsc::Receiver<ToggleEvent>) -> Self {
        loop {
            let step = tokio::select! {
                event = events.recv() => Step::Event(event),
                Some((load, result)) = self.inflight.next(), if !self.inflight.is_empty() => {
                    Step::Loaded(load, result)
                }
            };
            match step {
                Step::Event(Some(event)) => {
                    if let Err(err) = self.handle(event) {
                        warn!(%err, "toggle rejected");
                    }
                }
                Step::Event(None) => break,
                Step::Loaded(load, result) => {
                    self.finish(load, result);
                }
            }
        }
        self.settle().await;
        self
    }
}
