//! Mock worker implementation for testing
//!
//! This module provides an in-process worker that implements the channel traits,
//! with hooks for scripting states, injecting events and simulating a crash.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::service::{can_start, can_stop, ServiceState};
use crate::worker::traits::*;
use crate::Error;

/// In-process stand-in for the worker process
#[derive(Debug)]
pub struct MockWorker {
    state: Mutex<ServiceState>,
    events: Mutex<Option<mpsc::Sender<WorkerEvent>>>,
    start_failure: Mutex<Option<String>>,
    profile_name: String,
    /// Bumped on every simulated crash; channels from older generations are dead
    generation: AtomicU64,
    bandwidth_interval: AtomicU64,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    reload_calls: AtomicUsize,
    register_calls: AtomicUsize,
    unregister_calls: AtomicUsize,
}

impl MockWorker {
    /// Create a new idle mock worker
    pub fn new() -> Self {
        Self::with_state(ServiceState::Idle)
    }

    /// Create a mock worker already in `state`
    pub fn with_state(state: ServiceState) -> Self {
        Self {
            state: Mutex::new(state),
            events: Mutex::new(None),
            start_failure: Mutex::new(None),
            profile_name: "mock".to_string(),
            generation: AtomicU64::new(0),
            bandwidth_interval: AtomicU64::new(0),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            reload_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            unregister_calls: AtomicUsize::new(0),
        }
    }

    /// Current worker-side state
    pub async fn state(&self) -> ServiceState {
        *self.state.lock().await
    }

    /// Change the worker-side state without notifying anyone
    pub async fn set_state(&self, state: ServiceState) {
        *self.state.lock().await = state;
    }

    /// Make the next start fail with `message`
    pub async fn fail_next_start<S: Into<String>>(&self, message: S) {
        *self.start_failure.lock().await = Some(message.into());
    }

    /// Push an event to the registered callback, if any
    pub async fn emit(&self, event: WorkerEvent) -> bool {
        let sender = self.events.lock().await.clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Simulate a crash: every existing channel dies and its event stream ends
    pub async fn kill(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.events.lock().await.take();
        self.bandwidth_interval.store(0, Ordering::SeqCst);
    }

    /// Whether an event callback is registered
    pub async fn has_callback(&self) -> bool {
        self.events.lock().await.is_some()
    }

    /// Interval requested by the client (0 when not listening)
    pub fn bandwidth_interval(&self) -> u64 {
        self.bandwidth_interval.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn reload_calls(&self) -> usize {
        self.reload_calls.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn unregister_calls(&self) -> usize {
        self.unregister_calls.load(Ordering::SeqCst)
    }

    async fn transition(&self, state: ServiceState, message: Option<String>) {
        *self.state.lock().await = state;
        self.emit(WorkerEvent::StateChanged {
            state,
            profile_name: Some(self.profile_name.clone()),
            message,
        })
        .await;
    }

    async fn run_start(&self) {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if !can_start(self.state().await) {
            return;
        }

        self.transition(ServiceState::Connecting, None).await;
        match self.start_failure.lock().await.take() {
            Some(message) => self.transition(ServiceState::Stopped, Some(message)).await,
            None => self.transition(ServiceState::Connected, None).await,
        }
    }

    async fn run_stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if !can_stop(self.state().await) {
            return;
        }

        self.transition(ServiceState::Stopping, None).await;
        self.transition(ServiceState::Idle, None).await;
    }
}

impl Default for MockWorker {
    fn default() -> Self {
        Self::new()
    }
}

/// Mock worker channel
#[derive(Debug)]
pub struct MockWorkerChannel {
    worker: Arc<MockWorker>,
    generation: u64,
    closed: AtomicBool,
}

impl MockWorkerChannel {
    /// Bind a channel to the worker's current generation
    pub fn new(worker: Arc<MockWorker>) -> Self {
        let generation = worker.generation.load(Ordering::SeqCst);
        Self {
            worker,
            generation,
            closed: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<(), Error> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::channel("Mock worker channel is dead"))
        }
    }
}

#[async_trait]
impl WorkerChannel for MockWorkerChannel {
    async fn start(&self) -> Result<(), Error> {
        self.check()?;
        self.worker.run_start().await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.check()?;
        self.worker.run_stop().await;
        Ok(())
    }

    async fn reload(&self) -> Result<(), Error> {
        self.check()?;
        self.worker.reload_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query_state(&self) -> Result<ServiceState, Error> {
        self.check()?;
        Ok(self.worker.state().await)
    }

    async fn register_callback(&self) -> Result<mpsc::Receiver<WorkerEvent>, Error> {
        self.check()?;
        let (sender, receiver) = mpsc::channel(100);
        *self.worker.events.lock().await = Some(sender);
        self.worker.register_calls.fetch_add(1, Ordering::SeqCst);
        Ok(receiver)
    }

    async fn unregister_callback(&self) -> Result<(), Error> {
        self.check()?;
        self.worker.events.lock().await.take();
        self.worker.unregister_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start_listening_for_bandwidth(&self, interval_ms: u64) -> Result<(), Error> {
        self.check()?;
        self.worker
            .bandwidth_interval
            .store(interval_ms, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_listening_for_bandwidth(&self) -> Result<(), Error> {
        self.check()?;
        self.worker.bandwidth_interval.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        if self.is_active() {
            self.worker.events.lock().await.take();
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.worker.generation.load(Ordering::SeqCst) == self.generation
    }
}

/// Mock connector handing out [`MockWorkerChannel`]s
#[derive(Debug)]
pub struct MockWorkerConnector {
    worker: Arc<MockWorker>,
    bind_calls: AtomicUsize,
    refused_binds: AtomicUsize,
    bind_delay_ms: AtomicU64,
}

impl MockWorkerConnector {
    /// Create a connector for `worker`
    pub fn new(worker: Arc<MockWorker>) -> Self {
        Self {
            worker,
            bind_calls: AtomicUsize::new(0),
            refused_binds: AtomicUsize::new(0),
            bind_delay_ms: AtomicU64::new(0),
        }
    }

    /// Refuse the next `count` bind attempts
    pub fn refuse_binds(&self, count: usize) {
        self.refused_binds.store(count, Ordering::SeqCst);
    }

    /// Make every later bind take `delay_ms` before it resolves
    pub fn delay_binds(&self, delay_ms: u64) {
        self.bind_delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    /// Number of bind attempts so far, refused ones included
    pub fn bind_calls(&self) -> usize {
        self.bind_calls.load(Ordering::SeqCst)
    }

    /// The worker behind this connector
    pub fn worker(&self) -> &Arc<MockWorker> {
        &self.worker
    }
}

#[async_trait]
impl WorkerConnector for MockWorkerConnector {
    async fn bind(&self) -> Result<Arc<dyn WorkerChannel>, Error> {
        self.bind_calls.fetch_add(1, Ordering::SeqCst);

        let delay_ms = self.bind_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        let refused = self
            .refused_binds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::channel("Mock worker refused bind"));
        }

        Ok(Arc::new(MockWorkerChannel::new(Arc::clone(&self.worker))) as Arc<dyn WorkerChannel>)
    }
}
