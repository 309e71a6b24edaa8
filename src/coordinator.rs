// ── Polling coordinator ──
//
// Owns the latest snapshot of one VisionAir unit, polls it on a timer and
// funnels commands through the same link.

use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures::FutureExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::error::VisionAirError;
use crate::domain::models::{
    Command, CoordinatorEvent, CoordinatorState, DeviceAddress, DeviceStatus,
};
use crate::domain::settings::{Settings, MIN_UPDATE_INTERVAL_SECS};
use crate::infrastructure::bluetooth::{aggregator, executor, BleAdapter, Connector};

/// Polls one device and executes commands against it.
///
/// Cheaply cloneable. All clones share the snapshot, the schedule and the
/// in-flight gate: at most one poll or command runs at a time.
pub struct PollingCoordinator<A: BleAdapter> {
    inner: Arc<Inner<A>>,
}

impl<A: BleAdapter> Clone for PollingCoordinator<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<A: BleAdapter> {
    address: DeviceAddress,
    connector: Arc<Connector<A>>,
    last_status: ArcSwapOption<DeviceStatus>,
    state: watch::Sender<CoordinatorState>,
    poll_interval: watch::Sender<Duration>,
    next_poll_due: StdMutex<Option<Instant>>,
    events: Option<mpsc::UnboundedSender<CoordinatorEvent>>,
    cancel: CancellationToken,
    in_flight: Mutex<()>,
    poller: StdMutex<Option<JoinHandle<()>>>,
}

/// Puts the coordinator back to idle when an operation ends, however it ends.
struct PhaseGuard<'a, A: BleAdapter> {
    inner: &'a Inner<A>,
}

impl<A: BleAdapter> Drop for PhaseGuard<'_, A> {
    fn drop(&mut self) {
        self.inner.set_state(CoordinatorState::Idle);
    }
}

fn clamp_interval(interval: Duration) -> Duration {
    interval.max(Duration::from_secs(MIN_UPDATE_INTERVAL_SECS))
}

impl<A: BleAdapter> Inner<A> {
    fn emit(&self, event: CoordinatorEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn set_state(&self, state: CoordinatorState) {
        let changed = self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        if changed {
            debug!(address = %self.address, ?state, "State changed");
            self.emit(CoordinatorEvent::StateChanged(state));
        }
    }

    fn set_next_poll_due(&self, due: Option<Instant>) {
        *self
            .next_poll_due
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = due;
    }

    async fn begin(
        &self,
        state: CoordinatorState,
    ) -> (tokio::sync::MutexGuard<'_, ()>, PhaseGuard<'_, A>) {
        let permit = self.in_flight.lock().await;
        self.set_state(state);
        (permit, PhaseGuard { inner: self })
    }
}

impl<A: BleAdapter> PollingCoordinator<A> {
    /// Create a coordinator for `address`. Does not poll until
    /// [`refresh`](Self::refresh) or [`start`](Self::start) is called.
    pub fn new(
        address: DeviceAddress,
        connector: Arc<Connector<A>>,
        poll_interval: Duration,
        events: Option<mpsc::UnboundedSender<CoordinatorEvent>>,
    ) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Idle);
        let (poll_interval, _) = watch::channel(clamp_interval(poll_interval));

        Self {
            inner: Arc::new(Inner {
                address,
                connector,
                last_status: ArcSwapOption::empty(),
                state,
                poll_interval,
                next_poll_due: StdMutex::new(None),
                events,
                cancel: CancellationToken::new(),
                in_flight: Mutex::new(()),
                poller: StdMutex::new(None),
            }),
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.inner.address
    }

    /// Most recent successful snapshot, if any.
    pub fn last_status(&self) -> Option<Arc<DeviceStatus>> {
        self.inner.last_status.load_full()
    }

    pub fn state(&self) -> CoordinatorState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.inner.state.subscribe()
    }

    pub fn poll_interval(&self) -> Duration {
        *self.inner.poll_interval.borrow()
    }

    /// Change the polling interval. Takes effect from the next scheduled
    /// tick; a poll already running is left alone.
    pub fn set_poll_interval(&self, interval: Duration) {
        let interval = clamp_interval(interval);
        info!(address = %self.inner.address, ?interval, "Poll interval changed");
        self.inner.poll_interval.send_replace(interval);
    }

    /// Pick up configuration changes. Returns whether the interval changed.
    pub fn apply_settings(&self, settings: &Settings) -> bool {
        let interval = clamp_interval(settings.update_interval());
        if interval == self.poll_interval() {
            return false;
        }
        self.set_poll_interval(interval);
        true
    }

    /// When the scheduler will poll next. `None` while it is not running
    /// or a scheduled poll is in progress.
    pub fn next_poll_due(&self) -> Option<Instant> {
        *self
            .inner
            .next_poll_due
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Poll the device now.
    ///
    /// Success replaces the cached snapshot and publishes
    /// [`CoordinatorEvent::StatusUpdated`]. Failure keeps the previous
    /// snapshot and publishes [`CoordinatorEvent::FetchFailed`].
    pub async fn refresh(&self) -> Result<Arc<DeviceStatus>, VisionAirError> {
        let inner = &self.inner;
        let (_permit, _phase) = inner.begin(CoordinatorState::Polling).await;

        let result = inner
            .connector
            .with_session(inner.address, |session| {
                aggregator::fetch_status(session).boxed()
            })
            .await;

        match result {
            Ok(status) => {
                let status = Arc::new(status);
                inner.last_status.store(Some(status.clone()));
                debug!(address = %inner.address, ?status, "Status updated");
                inner.emit(CoordinatorEvent::StatusUpdated(status.clone()));
                Ok(status)
            }
            Err(e) => {
                warn!(
                    address = %inner.address,
                    error = %e,
                    transient = e.is_transient(),
                    "Poll failed"
                );
                inner.emit(CoordinatorEvent::FetchFailed(e.clone()));
                Err(e)
            }
        }
    }

    /// Apply `command` and return the resulting snapshot.
    ///
    /// Invalid parameters are rejected before waiting for the link. Failures
    /// go to the caller only and leave the cached snapshot untouched.
    pub async fn execute(&self, command: Command) -> Result<Arc<DeviceStatus>, VisionAirError> {
        command.validate()?;

        let inner = &self.inner;
        let (_permit, _phase) = inner.begin(CoordinatorState::Commanding).await;
        info!(address = %inner.address, %command, "{}", command.action());

        let status = Arc::new(executor::execute(&inner.connector, inner.address, command).await?);
        inner.last_status.store(Some(status.clone()));
        inner.emit(CoordinatorEvent::StatusUpdated(status.clone()));
        Ok(status)
    }

    /// Spawn the polling scheduler. The first scheduled poll happens one
    /// interval from now. Calling it again while running does nothing.
    ///
    /// The scheduler only holds a weak reference: it stops on its own once
    /// every handle to this coordinator is dropped.
    pub fn start(&self) {
        let mut poller = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if poller.is_some() || self.inner.cancel.is_cancelled() {
            return;
        }
        info!(address = %self.inner.address, interval = ?self.poll_interval(), "Starting poller");
        *poller = Some(tokio::spawn(poll_task(
            Arc::downgrade(&self.inner),
            self.inner.poll_interval.subscribe(),
            self.inner.cancel.clone(),
        )));
    }

    /// Stop the scheduler, abandoning a scheduled poll that is in progress.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handle = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.set_next_poll_due(None);
        debug!(address = %self.inner.address, "Poller stopped");
    }
}

// ── Background task ──────────────────────────────────────────────

async fn poll_task<A: BleAdapter>(
    weak: Weak<Inner<A>>,
    mut interval_rx: watch::Receiver<Duration>,
    cancel: CancellationToken,
) {
    let mut last_tick = Instant::now();

    loop {
        let due = last_tick + *interval_rx.borrow_and_update();
        match weak.upgrade() {
            Some(inner) => inner.set_next_poll_due(Some(due)),
            None => break,
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = interval_rx.changed() => {
                // Sender gone: the coordinator was dropped
                if changed.is_err() {
                    break;
                }
                // Reschedule from the last tick with the new interval
                continue;
            }
            _ = tokio::time::sleep_until(due) => {}
        }

        let Some(inner) = weak.upgrade() else {
            break;
        };
        let coordinator = PollingCoordinator { inner };
        last_tick = Instant::now();
        coordinator.inner.set_next_poll_due(None);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = coordinator.refresh() => {
                if let Err(e) = result {
                    debug!(error = %e, "Scheduled poll failed, retrying next tick");
                }
            }
        }
    }
    debug!("Poll task exited");
}
