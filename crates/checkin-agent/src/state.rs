//! Registry of running instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use checkin_core::{
    ChannelScanner, CheckinError, KeyValueStore, PipelineHandle, PipelineStatus,
    ProximityPipeline, ScannerFeed, Transport,
};
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::InstanceConfig;

/// Errors operating instances.
#[derive(Debug, Error)]
pub enum AgentError {
    /// An instance with this name is already running.
    #[error("Instance '{0}' is already running")]
    AlreadyRunning(String),

    /// No instance with this name is running.
    #[error("Instance '{0}' is not running")]
    UnknownInstance(String),

    /// The pipeline could not be started or has stopped.
    #[error("Instance '{instance}': {source}")]
    Pipeline {
        /// Instance name.
        instance: String,
        /// Pipeline failure.
        #[source]
        source: CheckinError,
    },

    /// The instance's feed could not be read.
    #[error("Instance '{instance}' feed: {source}")]
    Feed {
        /// Instance name.
        instance: String,
        /// Read failure.
        #[source]
        source: std::io::Error,
    },
}

impl AgentError {
    fn pipeline(instance: &str, source: impl Into<CheckinError>) -> Self {
        Self::Pipeline {
            instance: instance.to_string(),
            source: source.into(),
        }
    }
}

struct RunningInstance {
    handle: PipelineHandle,
    feed: ScannerFeed,
}

#[derive(Default)]
struct AgentStateInner {
    instances: RwLock<BTreeMap<String, RunningInstance>>,
}

/// Shared handle to the running instances.
#[derive(Clone, Default)]
pub struct AgentState {
    inner: Arc<AgentStateInner>,
}

impl AgentState {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a pipeline for `instance` with its own channel scanner.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or the pipeline cannot start.
    pub async fn start_instance(
        &self,
        instance: &InstanceConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<(), AgentError> {
        let mut instances = self.inner.instances.write().await;
        if instances.contains_key(&instance.name) {
            return Err(AgentError::AlreadyRunning(instance.name.clone()));
        }

        let scanner = ChannelScanner::new();
        let feed = scanner.feed();
        let handle = ProximityPipeline::new(&instance.sdk, transport, Arc::new(scanner), store)
            .and_then(ProximityPipeline::spawn)
            .map_err(|e| AgentError::pipeline(&instance.name, e))?;

        info!(instance = %instance.name, "Instance started");
        instances.insert(instance.name.clone(), RunningInstance { handle, feed });
        Ok(())
    }

    /// Start a pipeline for `instance` talking to its configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built, or see
    /// [`AgentState::start_instance`].
    #[cfg(feature = "http")]
    pub async fn start_http_instance(
        &self,
        instance: &InstanceConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<(), AgentError> {
        let transport = checkin_core::HttpTransport::from_config(&instance.sdk)
            .map_err(|e| AgentError::pipeline(&instance.name, e))?;
        self.start_instance(instance, Arc::new(transport), store).await
    }

    /// Names of running instances, sorted.
    pub async fn names(&self) -> Vec<String> {
        self.inner.instances.read().await.keys().cloned().collect()
    }

    /// Event feed of an instance's scanner.
    ///
    /// # Errors
    ///
    /// Returns `UnknownInstance` if no such instance is running.
    pub async fn feed(&self, name: &str) -> Result<ScannerFeed, AgentError> {
        self.inner
            .instances
            .read()
            .await
            .get(name)
            .map(|instance| instance.feed.clone())
            .ok_or_else(|| AgentError::UnknownInstance(name.to_string()))
    }

    /// Status of an instance, after its queued events are processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance is unknown or its pipeline stopped.
    pub async fn status(&self, name: &str) -> Result<PipelineStatus, AgentError> {
        let instances = self.inner.instances.read().await;
        let instance = instances
            .get(name)
            .ok_or_else(|| AgentError::UnknownInstance(name.to_string()))?;
        instance
            .handle
            .status()
            .await
            .map_err(|e| AgentError::pipeline(name, e))
    }

    /// Stop every instance concurrently and report how each ended.
    pub async fn shutdown_all(&self) -> Vec<(String, Result<PipelineStatus, AgentError>)> {
        let instances = std::mem::take(&mut *self.inner.instances.write().await);

        join_all(instances.into_iter().map(|(name, instance)| async move {
            let result = instance
                .handle
                .shutdown()
                .await
                .map_err(|e| AgentError::pipeline(&name, e));
            (name, result)
        }))
        .await
    }
}
