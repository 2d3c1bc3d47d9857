//! Service connection implementation
//!
//! Client-side handle to the worker process. Owns the single binding, caches the
//! worker state, forwards pushed events to the callback target and rebinds
//! transparently when the channel dies.

use futures::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::state::{can_start, can_stop, ServiceState};
use super::traits::{ReconnectPolicy, ServiceCallback};
use crate::worker::{WorkerChannel, WorkerConnector, WorkerEvent};
use crate::Result;

/// Client-side handle to the worker process
pub struct ServiceConnection {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn WorkerConnector>,
    slot: Mutex<Slot>,
    /// Cached worker state; `None` while unknown
    state: watch::Sender<Option<ServiceState>>,
    /// Traffic sample cadence in ms, 0 = disabled
    bandwidth_interval: AtomicU64,
    policy: ReconnectPolicy,
    /// Set when the owning handle is dropped
    closed: AtomicBool,
}

#[derive(Default)]
struct Slot {
    callback: Option<Arc<dyn ServiceCallback>>,
    binding: Option<Binding>,
}

/// One live binding and the task pumping its events
struct Binding {
    id: Uuid,
    channel: Arc<dyn WorkerChannel>,
    pump: JoinHandle<()>,
}

impl ServiceConnection {
    /// Create an unbound connection
    pub fn new(connector: Arc<dyn WorkerConnector>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                connector,
                slot: Mutex::new(Slot::default()),
                state,
                bandwidth_interval: AtomicU64::new(0),
                policy,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Bind to the worker and deliver its current state to `callback`
    ///
    /// When already bound this does not rebind or register again. A different
    /// callback replaces the current one and receives the cached state once.
    /// If the bind fails the callback is told the worker is `Idle` and the error
    /// is returned.
    #[instrument(skip_all)]
    pub async fn connect(&self, callback: Arc<dyn ServiceCallback>) -> crate::Result<()> {
        let mut slot = self.inner.slot.lock().await;

        if slot.binding.is_some() {
            let same = slot
                .callback
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &callback));
            if same {
                debug!("Already bound to worker");
                return Ok(());
            }

            debug!("Replacing callback target on live binding");
            slot.callback = Some(Arc::clone(&callback));
            callback.on_state_changed(self.state(), None, None);
            return Ok(());
        }

        slot.callback = Some(callback);
        match self.inner.open().await {
            Ok(opened) => {
                Inner::install(&self.inner, &mut slot, opened);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to bind to worker");
                self.inner.report_unreachable(&slot);
                Err(e)
            }
        }
    }

    /// Unbind from the worker
    ///
    /// Idempotent and safe to call when never connected. Stops any further
    /// callback delivery.
    #[instrument(skip_all)]
    pub async fn disconnect(&self) {
        self.inner.unbind().await;
    }

    /// Disconnect and bind again with the same callback target
    pub async fn rebind(&self) -> crate::Result<()> {
        let callback = self.inner.slot.lock().await.callback.clone();
        self.disconnect().await;
        match callback {
            Some(callback) => self.connect(callback).await,
            None => Ok(()),
        }
    }

    /// Change the traffic sample cadence; `0` pauses samples
    ///
    /// Takes effect on the live binding immediately and is re-applied on every
    /// later bind.
    pub async fn set_bandwidth_interval(&self, interval_ms: u64) {
        let previous = self
            .inner
            .bandwidth_interval
            .swap(interval_ms, Ordering::SeqCst);

        let Some(channel) = self.inner.current_channel().await else {
            return;
        };

        let result = if interval_ms > 0 {
            channel.start_listening_for_bandwidth(interval_ms).await
        } else if previous > 0 {
            channel.stop_listening_for_bandwidth().await
        } else {
            Ok(())
        };
        if let Err(e) = result {
            warn!(error = %e, interval_ms, "Failed to update bandwidth listening");
        }
    }

    /// Current traffic sample cadence in milliseconds
    pub fn bandwidth_interval(&self) -> u64 {
        self.inner.bandwidth_interval.load(Ordering::SeqCst)
    }

    /// Cached worker state; `Idle` while unbound or unknown
    pub fn state(&self) -> ServiceState {
        self.inner.cached_state()
    }

    /// Watch the cached state (`None` while unknown)
    pub fn watch_state(&self) -> watch::Receiver<Option<ServiceState>> {
        self.inner.state.subscribe()
    }

    /// Whether a binding is currently live
    pub async fn is_bound(&self) -> bool {
        self.inner.slot.lock().await.binding.is_some()
    }

    /// Ask the worker for its state; an unreachable worker reads as `Idle`
    pub async fn query_state(&self) -> ServiceState {
        let Some(channel) = self.inner.current_channel().await else {
            return ServiceState::Idle;
        };

        match channel.query_state().await {
            Ok(state) => {
                self.inner.state.send_replace(Some(state));
                state
            }
            Err(e) => {
                debug!(error = %e, "State query failed");
                ServiceState::Idle
            }
        }
    }

    /// Whether a stop request would be forwarded
    pub fn can_stop(&self) -> bool {
        can_stop(self.state())
    }

    /// Request the worker to start; returns whether the command was sent
    pub async fn start(&self) -> bool {
        let state = self.state();
        if !can_start(state) {
            debug!(%state, "Ignoring start request");
            return false;
        }
        self.send("start", |channel| async move { channel.start().await })
            .await
    }

    /// Request the worker to stop; returns whether the command was sent
    pub async fn stop(&self) -> bool {
        let state = self.state();
        if !can_stop(state) {
            debug!(%state, "Ignoring stop request");
            return false;
        }
        self.send("stop", |channel| async move { channel.stop().await })
            .await
    }

    /// Stop when running, start otherwise
    pub async fn toggle(&self) -> bool {
        if self.can_stop() {
            self.stop().await
        } else {
            self.start().await
        }
    }

    /// Ask a running worker to reload its profile
    pub async fn reload(&self) -> bool {
        let state = self.state();
        if !can_stop(state) {
            debug!(%state, "Ignoring reload request");
            return false;
        }
        self.send("reload", |channel| async move { channel.reload().await })
            .await
    }

    async fn send<F, Fut>(&self, command: &str, call: F) -> bool
    where
        F: FnOnce(Arc<dyn WorkerChannel>) -> Fut,
        Fut: std::future::Future<Output = crate::Result<()>>,
    {
        let Some(channel) = self.inner.current_channel().await else {
            warn!(command, "Not bound to worker");
            return false;
        };

        match call(channel).await {
            Ok(()) => true,
            Err(e) => {
                warn!(command, error = %e, "Worker command failed");
                false
            }
        }
    }
}

impl Drop for ServiceConnection {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move { inner.unbind().await });
            }
            Err(_) => {
                // no runtime left to reach the worker on
                if let Ok(mut slot) = self.inner.slot.try_lock() {
                    slot.callback = None;
                    if let Some(binding) = slot.binding.take() {
                        binding.pump.abort();
                    }
                }
            }
        }
    }
}

impl Binding {
    /// Stop the pump and drop the worker-side registration
    async fn release(self, bandwidth_interval: u64) {
        self.pump.abort();
        release_channel(self.channel.as_ref(), bandwidth_interval).await;
        info!(binding = %self.id, "Disconnected from worker");
    }
}

/// Stop traffic samples, unregister and close
async fn release_channel(channel: &dyn WorkerChannel, bandwidth_interval: u64) {
    if bandwidth_interval > 0 {
        if let Err(e) = channel.stop_listening_for_bandwidth().await {
            debug!(error = %e, "Stop listening for bandwidth failed");
        }
    }
    if let Err(e) = channel.unregister_callback().await {
        debug!(error = %e, "Unregister callback failed");
    }
    close_channel(channel).await;
}

async fn close_channel(channel: &dyn WorkerChannel) {
    if let Err(e) = channel.close().await {
        debug!(error = %e, "Closing worker channel failed");
    }
}

/// A registered channel whose state is known but which is not yet live
struct Opened {
    channel: Arc<dyn WorkerChannel>,
    events: mpsc::Receiver<WorkerEvent>,
    state: ServiceState,
}

impl Inner {
    fn cached_state(&self) -> ServiceState {
        (*self.state.borrow()).unwrap_or(ServiceState::Idle)
    }

    async fn current_channel(&self) -> Option<Arc<dyn WorkerChannel>> {
        self.slot
            .lock()
            .await
            .binding
            .as_ref()
            .map(|binding| Arc::clone(&binding.channel))
    }

    /// Callback target for events of binding `id`, if it is still the live one
    async fn callback_for(&self, id: Uuid) -> Option<Arc<dyn ServiceCallback>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let slot = self.slot.lock().await;
        match &slot.binding {
            Some(binding) if binding.id == id => slot.callback.clone(),
            _ => None,
        }
    }

    /// Take the slot apart and release the live binding, if any
    async fn unbind(&self) {
        let binding = {
            let mut slot = self.slot.lock().await;
            slot.callback = None;
            slot.binding.take()
        };
        self.state.send_replace(None);

        if let Some(binding) = binding {
            binding
                .release(self.bandwidth_interval.load(Ordering::SeqCst))
                .await;
        }
    }

    /// Whether a pending rebind is no longer wanted
    fn superseded(&self, slot: &Slot) -> bool {
        self.closed.load(Ordering::SeqCst) || slot.binding.is_some() || slot.callback.is_none()
    }

    /// Bind, register and reconcile state without touching the slot
    async fn open(&self) -> Result<Opened> {
        let channel = self.connector.bind().await?;

        let events = match channel.register_callback().await {
            Ok(events) => events,
            Err(e) => {
                close_channel(channel.as_ref()).await;
                return Err(e);
            }
        };

        let interval = self.bandwidth_interval.load(Ordering::SeqCst);
        if interval > 0 {
            if let Err(e) = channel.start_listening_for_bandwidth(interval).await {
                warn!(error = %e, interval, "Failed to start bandwidth listening");
            }
        }

        let state = match channel.query_state().await {
            Ok(state) => state,
            Err(e) => {
                release_channel(channel.as_ref(), interval).await;
                return Err(e);
            }
        };

        Ok(Opened {
            channel,
            events,
            state,
        })
    }

    /// Make `opened` the live binding and start its event pump
    ///
    /// Runs with the slot locked so the initial state reaches the callback
    /// before any pushed event of the new binding.
    fn install(inner: &Arc<Inner>, slot: &mut Slot, opened: Opened) {
        let Opened {
            channel,
            events,
            state,
        } = opened;
        inner.state.send_replace(Some(state));

        let id = Uuid::new_v4();
        let pump = tokio::spawn(Arc::clone(inner).pump(id, events));
        slot.binding = Some(Binding { id, channel, pump });
        info!(binding = %id, %state, "Bound to worker");

        if let Some(callback) = &slot.callback {
            callback.on_state_changed(state, None, None);
        }
    }

    /// Forward events of binding `id` until its stream ends
    async fn pump(self: Arc<Self>, id: Uuid, mut events: mpsc::Receiver<WorkerEvent>) {
        while let Some(event) = events.recv().await {
            let Some(callback) = self.callback_for(id).await else {
                return;
            };
            self.dispatch(callback.as_ref(), event);
        }

        self.recover(id).await;
    }

    fn dispatch(&self, callback: &dyn ServiceCallback, event: WorkerEvent) {
        match event {
            WorkerEvent::StateChanged {
                state,
                profile_name,
                message,
            } => {
                self.state.send_replace(Some(state));
                match &message {
                    Some(message) => warn!(%state, error = %message, "Worker reported failure"),
                    None => debug!(%state, "Worker state changed"),
                }
                callback.on_state_changed(state, profile_name.as_deref(), message.as_deref());
            }
            WorkerEvent::TrafficUpdated { profile_id, stats } => {
                if self.bandwidth_interval.load(Ordering::SeqCst) == 0 {
                    debug!(profile_id, "Dropping traffic sample, polling disabled");
                    return;
                }
                callback.on_traffic_updated(profile_id, stats);
            }
            WorkerEvent::TrafficPersisted { profile_id } => {
                callback.on_traffic_persisted(profile_id);
            }
        }
    }

    /// Replace a dead binding without surfacing an error
    ///
    /// Boxed because it closes the pump -> recover -> bind -> pump cycle.
    fn recover(self: Arc<Self>, dead: Uuid) -> BoxFuture<'static, ()> {
        async move {
            {
                let mut slot = self.slot.lock().await;
                match &slot.binding {
                    Some(binding) if binding.id == dead => {}
                    // clean disconnect or already replaced
                    _ => return,
                }
                // the worker is gone; nothing to unregister
                slot.binding = None;
            }
            self.state.send_replace(None);
            warn!(binding = %dead, "Worker channel died, rebinding");

            let attempts = self.policy.attempts.max(1);
            for attempt in 1..=attempts {
                let superseded = self.superseded(&*self.slot.lock().await);
                if superseded {
                    debug!("Recovery superseded");
                    return;
                }

                // slot stays unlocked while binding
                match self.open().await {
                    Ok(opened) => {
                        let mut slot = self.slot.lock().await;
                        if self.superseded(&slot) {
                            drop(slot);
                            debug!("Recovery superseded, releasing fresh channel");
                            let interval = self.bandwidth_interval.load(Ordering::SeqCst);
                            release_channel(opened.channel.as_ref(), interval).await;
                            return;
                        }
                        Inner::install(&self, &mut slot, opened);
                        info!(attempt, "Rebound to worker");
                        return;
                    }
                    Err(e) => warn!(attempt, error = %e, "Rebind failed"),
                }
                if attempt < attempts {
                    tokio::time::sleep(self.policy.backoff * attempt).await;
                }
            }

            error!(attempts, "Worker unreachable, giving up");
            let slot = self.slot.lock().await;
            if slot.binding.is_none() {
                self.report_unreachable(&slot);
            }
        }
        .boxed()
    }

    /// Collapse an unreachable worker to `Idle` for the observer
    fn report_unreachable(&self, slot: &Slot) {
        self.state.send_replace(Some(ServiceState::Idle));
        if let Some(callback) = &slot.callback {
            callback.on_state_changed(ServiceState::Idle, None, None);
        }
    }
}
