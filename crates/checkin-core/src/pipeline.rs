//! Per-instance pipeline actor.
//!
//! A [`ProximityPipeline`] owns everything belonging to one SDK instance and
//! runs it on a single tokio task:
//!
//! 1. subscribe to the scanner (before anything can be missed),
//! 2. fetch the catalog and start monitoring its regions,
//! 3. resume delivery of a queue left over from a previous run,
//! 4. process scanner events in arrival order, fire the delivery retry when
//!    its deadline passes, and answer [`PipelineHandle`] commands.
//!
//! The scanner only pushes into the subscription channel, so it never waits
//! on storage or the network. All history and queue read-modify-write
//! happens on the actor task.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

use crate::catalog::{RegionCatalog, UniquenessThrottle};
use crate::config::SdkConfig;
use crate::delivery::{DeliveryManager, DeliveryOutcome};
use crate::error::{CheckinError, Result};
use crate::monitor::{BeaconEventHandler, LoggingEventHandler, RegionMonitor};
use crate::recorder::SightingRecorder;
use crate::scanner::{ProximityScanner, ScannerEvent, ScannerSubscription};
use crate::sighting::RawSighting;
use crate::storage::{KeyValueStore, SightingStore, StoreResult, HISTORY_KEY, PENDING_KEY};
use crate::transport::Transport;
use crate::types::{MonitoringState, RegionId};

/// Point-in-time view of a running pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatus {
    /// Storage namespace of the instance.
    pub namespace: String,
    /// Monitoring state of every known region.
    pub regions: BTreeMap<RegionId, MonitoringState>,
    /// Throttle in effect.
    pub throttle: UniquenessThrottle,
    /// Persisted history length.
    pub history_len: usize,
    /// Persisted pending queue length.
    pub pending_len: usize,
    /// Whether a delivery retry is armed.
    pub retry_armed: bool,
}

#[derive(Debug)]
enum Command {
    Status(oneshot::Sender<PipelineStatus>),
    Shutdown,
}

/// One SDK instance, ready to be spawned.
pub struct ProximityPipeline {
    store: SightingStore,
    scanner: Arc<dyn ProximityScanner>,
    catalog: RegionCatalog,
    monitor: RegionMonitor,
    recorder: SightingRecorder,
    delivery: DeliveryManager,
    throttle: UniquenessThrottle,
}

impl std::fmt::Debug for ProximityPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityPipeline")
            .field("store", &self.store)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

impl ProximityPipeline {
    /// Assemble a pipeline with the logging event handler.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if `config` is invalid.
    pub fn new(
        config: &SdkConfig,
        transport: Arc<dyn Transport>,
        scanner: Arc<dyn ProximityScanner>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        Self::with_handler(config, transport, scanner, store, Arc::new(LoggingEventHandler))
    }

    /// Assemble a pipeline reporting region events to `handler`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if `config` is invalid.
    pub fn with_handler(
        config: &SdkConfig,
        transport: Arc<dyn Transport>,
        scanner: Arc<dyn ProximityScanner>,
        store: Arc<dyn KeyValueStore>,
        handler: Arc<dyn BeaconEventHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let default_throttle = UniquenessThrottle::from_millis(config.default_throttle_ms);
        let store = SightingStore::new(store, config.namespace());

        Ok(Self {
            catalog: RegionCatalog::new(Arc::clone(&transport), default_throttle),
            monitor: RegionMonitor::new(Arc::clone(&transport), Arc::clone(&scanner), handler),
            recorder: SightingRecorder::new(config.history_limit),
            delivery: DeliveryManager::new(
                transport,
                store.clone(),
                config.retry_delay(),
                config.timezone,
            ),
            store,
            scanner,
            throttle: default_throttle,
        })
    }

    /// Subscribe to the scanner and start the actor task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ScannerError` if the scanner refuses the subscription.
    pub fn spawn(self) -> Result<PipelineHandle> {
        let subscription = self.scanner.subscribe()?;
        let namespace = self.store.namespace().to_string();
        let (commands, receiver) = mpsc::unbounded_channel();

        let span = tracing::info_span!("pipeline", namespace = %namespace);
        let task = tokio::spawn(self.run(subscription, receiver).instrument(span));

        Ok(PipelineHandle {
            namespace,
            commands,
            task: Some(task),
        })
    }

    async fn run(
        mut self,
        subscription: ScannerSubscription,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> PipelineStatus {
        let mut subscription = Some(subscription);
        self.start().await;

        loop {
            tokio::select! {
                biased;

                () = retry_due(self.delivery.retry_deadline()) => {
                    self.delivery.cancel_retry();
                    debug!("Delivery retry due");
                    self.deliver().await;
                }
                command = commands.recv() => match command {
                    Some(Command::Status(reply)) => {
                        if let Some(subscription) = subscription.as_mut() {
                            while let Some(event) = subscription.try_next() {
                                self.handle_event(event).await;
                            }
                        }
                        self.monitor.flush_telemetry().await;
                        // the requester may have gone away
                        let _ = reply.send(self.status());
                    }
                    Some(Command::Shutdown) | None => break,
                },
                event = next_event(&mut subscription) => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("Scanner subscription closed");
                        subscription = None;
                    }
                },
            }
        }

        drop(subscription);
        self.delivery.cancel_retry();
        self.monitor.shutdown().await;
        let status = self.status();
        info!(pending = status.pending_len, "Pipeline stopped");
        status
    }

    async fn start(&mut self) {
        let snapshot = self.catalog.fetch().await;
        self.throttle = snapshot.throttle;
        self.monitor.start(snapshot.regions);

        // resume a queue left by a previous run
        self.deliver().await;
    }

    async fn handle_event(&mut self, event: ScannerEvent) {
        match event {
            ScannerEvent::RegionState { region, presence } => {
                self.monitor.on_presence(&region, presence);
            }
            ScannerEvent::Ranged { region, beacons } => {
                if !self.monitor.is_ranging(&region) {
                    debug!(region = %region, "Ignoring snapshot for region not being ranged");
                    return;
                }
                match self.record(beacons) {
                    Ok(0) => {}
                    Ok(accepted) => {
                        debug!(region = %region, accepted, "Sightings queued");
                        self.deliver().await;
                    }
                    Err(e) => {
                        let error = CheckinError::from(e);
                        error!(region = %region, error = %error, "Failed to record ranging snapshot");
                    }
                }
            }
        }
    }

    /// Deduplicate a snapshot and commit history and queue together.
    fn record(&self, beacons: Vec<RawSighting>) -> StoreResult<usize> {
        let mut history = self.store.load_or_reset(HISTORY_KEY)?;
        let accepted = self.recorder.accept(beacons, self.throttle, &mut history);
        if accepted.is_empty() {
            return Ok(0);
        }

        let mut pending = self.store.load_or_reset(PENDING_KEY)?;
        pending.extend(accepted.iter().cloned());
        self.store.commit(&history, &pending)?;
        Ok(accepted.len())
    }

    async fn deliver(&mut self) {
        match self.delivery.deliver(Vec::new()).await {
            DeliveryOutcome::Empty | DeliveryOutcome::Delivered { .. } => {}
            DeliveryOutcome::RetryScheduled { count, error } => {
                debug!(count, code = error.error_code(), "Delivery will be retried");
            }
        }
    }

    fn status(&self) -> PipelineStatus {
        let count = |key: &str| {
            self.store.load_or_reset(key).map_or_else(
                |e| {
                    warn!(key, error = %e, "Failed to read persisted sightings");
                    0
                },
                |sightings| sightings.len(),
            )
        };

        PipelineStatus {
            namespace: self.store.namespace().to_string(),
            regions: self
                .monitor
                .regions()
                .map(|region| (region.id(), self.monitor.state(region.id())))
                .collect(),
            throttle: self.throttle,
            history_len: count(HISTORY_KEY),
            pending_len: count(PENDING_KEY),
            retry_armed: self.delivery.retry_deadline().is_some(),
        }
    }
}

async fn retry_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_event(subscription: &mut Option<ScannerSubscription>) -> Option<ScannerEvent> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

/// Control handle of a spawned pipeline.
///
/// Dropping the handle without calling [`PipelineHandle::shutdown`] aborts
/// the task.
#[derive(Debug)]
pub struct PipelineHandle {
    namespace: String,
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<PipelineStatus>>,
}

impl PipelineHandle {
    /// Storage namespace of the instance.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Whether the actor task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Current status.
    ///
    /// Scanner events already queued and in-flight region reports are
    /// processed first.
    ///
    /// # Errors
    ///
    /// Returns `PipelineStopped` if the actor is gone.
    pub async fn status(&self) -> Result<PipelineStatus> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Status(reply))
            .map_err(|_| self.stopped())?;
        response.await.map_err(|_| self.stopped())
    }

    /// Stop the pipeline and wait for it to finish.
    ///
    /// Releases the scanner subscription, cancels the delivery retry, stops
    /// ranging and waits for in-flight region reports. The pending queue
    /// stays persisted for the next run.
    ///
    /// # Errors
    ///
    /// Returns `PipelineStopped` if the task panicked or was aborted.
    pub async fn shutdown(mut self) -> Result<PipelineStatus> {
        // already stopped if the send fails; the join below reports how
        let _ = self.commands.send(Command::Shutdown);
        let task = self.task.take().ok_or_else(|| self.stopped())?;
        task.await.map_err(|e| {
            error!(namespace = %self.namespace, error = %e, "Pipeline task failed");
            self.stopped()
        })
    }

    fn stopped(&self) -> CheckinError {
        CheckinError::PipelineStopped(self.namespace.clone())
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
