//! Connection registry.
//!
//! Maps job identifiers to the live push channel that wants their result,
//! and each channel back to its job. A job has at most one channel and a
//! channel speaks for at most one job; a newer registration evicts whatever
//! it conflicts with. Bindings live only in memory and clients rebuild them
//! after a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use scriptgen_models::{ChannelId, JobId, WsMessage};

use crate::metrics::{record_evictions, set_registry_bindings};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("jobId is required")]
    EmptyJobId,

    #[error("channel id is required")]
    EmptyChannel,

    #[error("channel {0} is closed")]
    ChannelClosed(ChannelId),
}

/// Outbound side of one push channel.
///
/// Cloning is cheap; every clone feeds the same connection task.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    sender: mpsc::UnboundedSender<WsMessage>,
}

impl ChannelHandle {
    /// Handle with a fresh random id.
    pub fn new(sender: mpsc::UnboundedSender<WsMessage>) -> Self {
        Self::with_id(ChannelId::new(), sender)
    }

    pub fn with_id(id: ChannelId, sender: mpsc::UnboundedSender<WsMessage>) -> Self {
        Self { id, sender }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Queue a frame for the connection task.
    pub fn send(&self, message: WsMessage) -> Result<(), RegistryError> {
        self.sender
            .send(message)
            .map_err(|_| RegistryError::ChannelClosed(self.id.clone()))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl PartialEq for ChannelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChannelHandle {}

/// Successful registration.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterAck {
    pub status: String,
    pub job_id: JobId,
    pub channel_id: ChannelId,
    pub timestamp: DateTime<Utc>,
    /// Channel that previously held this job, if any.
    pub superseded: Option<ChannelId>,
}

impl RegisterAck {
    /// Reply frame for the registering client.
    pub fn to_message(&self) -> WsMessage {
        WsMessage::Registered {
            status: self.status.clone(),
            job_id: self.job_id.clone(),
            channel: self.channel_id.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Why a push did not reach a client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("no channel registered for job {0}")]
    NotRegistered(JobId),

    /// The bound channel rejected the frame and has been evicted.
    #[error("channel {channel} for job {job_id} is gone")]
    ChannelGone { job_id: JobId, channel: ChannelId },
}

/// Counts from one liveness sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

#[derive(Debug)]
struct Binding {
    job_id: JobId,
    handle: ChannelHandle,
    /// Probe sent and not yet answered.
    awaiting_ack: bool,
}

#[derive(Debug, Default)]
struct Bindings {
    by_job: HashMap<JobId, ChannelId>,
    by_channel: HashMap<ChannelId, Binding>,
}

impl Bindings {
    fn remove_channel(&mut self, channel: &ChannelId) -> Option<Binding> {
        let binding = self.by_channel.remove(channel)?;
        if self.by_job.get(&binding.job_id) == Some(channel) {
            self.by_job.remove(&binding.job_id);
        }
        Some(binding)
    }

    fn remove_job(&mut self, job_id: &JobId) -> Option<Binding> {
        let channel = self.by_job.remove(job_id)?;
        self.by_channel.remove(&channel)
    }
}

/// Process-wide job/channel table.
///
/// Both directions sit behind one lock so every operation sees them agree.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    bindings: RwLock<Bindings>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `job_id` to `handle`.
    ///
    /// An older channel for the same job is evicted and told why. If the
    /// channel was bound to another job, that binding is dropped.
    pub async fn register(
        &self,
        job_id: &JobId,
        handle: ChannelHandle,
    ) -> Result<RegisterAck, RegistryError> {
        if job_id.is_blank() {
            return Err(RegistryError::EmptyJobId);
        }
        if handle.id().is_blank() {
            return Err(RegistryError::EmptyChannel);
        }

        let channel_id = handle.id().clone();
        let mut bindings = self.bindings.write().await;

        let mut superseded = None;
        if let Some(old) = bindings.by_job.get(job_id).cloned() {
            if old != channel_id {
                if let Some(evicted) = bindings.remove_channel(&old) {
                    let _ = evicted
                        .handle
                        .send(WsMessage::error(format!("job {} registered elsewhere", job_id)));
                }
                superseded = Some(old);
            }
        }

        if let Some(previous) = bindings.by_channel.get(&channel_id) {
            if &previous.job_id != job_id {
                debug!(
                    channel = %channel_id,
                    previous_job = %previous.job_id,
                    job_id = %job_id,
                    "Channel switched jobs"
                );
                let previous_job = previous.job_id.clone();
                bindings.remove_job(&previous_job);
            }
        }

        bindings.by_job.insert(job_id.clone(), channel_id.clone());
        bindings.by_channel.insert(
            channel_id.clone(),
            Binding {
                job_id: job_id.clone(),
                handle,
                awaiting_ack: false,
            },
        );
        set_registry_bindings(bindings.by_job.len());
        drop(bindings);

        info!(job_id = %job_id, channel = %channel_id, "Channel registered");
        Ok(RegisterAck {
            status: "ok".to_string(),
            job_id: job_id.clone(),
            channel_id,
            timestamp: Utc::now(),
            superseded,
        })
    }

    /// Drop the binding for `job_id`. Returns the channel it was bound to.
    pub async fn unregister(&self, job_id: &JobId) -> Option<ChannelId> {
        let mut bindings = self.bindings.write().await;
        let removed = bindings.remove_job(job_id).map(|b| b.handle.id().clone());
        set_registry_bindings(bindings.by_job.len());
        removed
    }

    pub async fn lookup(&self, job_id: &JobId) -> Option<ChannelHandle> {
        let bindings = self.bindings.read().await;
        let channel = bindings.by_job.get(job_id)?;
        bindings.by_channel.get(channel).map(|b| b.handle.clone())
    }

    pub async fn reverse_lookup(&self, channel: &ChannelId) -> Option<JobId> {
        let bindings = self.bindings.read().await;
        bindings.by_channel.get(channel).map(|b| b.job_id.clone())
    }

    /// Remove whatever `channel` was bound to. No-op for unknown channels.
    ///
    /// Called on every disconnect, whatever the cause.
    pub async fn on_channel_closed(&self, channel: &ChannelId) -> Option<JobId> {
        let mut bindings = self.bindings.write().await;
        let removed = bindings.remove_channel(channel).map(|b| b.job_id);
        set_registry_bindings(bindings.by_job.len());
        if let Some(job_id) = &removed {
            debug!(job_id = %job_id, channel = %channel, "Channel closed, binding removed");
        }
        removed
    }

    /// Record a heartbeat answer. Returns false for unknown channels.
    pub async fn heartbeat_ack(&self, channel: &ChannelId) -> bool {
        let mut bindings = self.bindings.write().await;
        match bindings.by_channel.get_mut(channel) {
            Some(binding) => {
                binding.awaiting_ack = false;
                true
            }
            None => false,
        }
    }

    /// Push `message` to the channel bound to `job_id`.
    ///
    /// A channel whose send fails is evicted on the spot.
    pub async fn push(&self, job_id: &JobId, message: WsMessage) -> Result<ChannelId, PushError> {
        let handle = self
            .lookup(job_id)
            .await
            .ok_or_else(|| PushError::NotRegistered(job_id.clone()))?;

        match handle.send(message) {
            Ok(()) => Ok(handle.id().clone()),
            Err(_) => {
                self.on_channel_closed(handle.id()).await;
                record_evictions("send_failed", 1);
                Err(PushError::ChannelGone {
                    job_id: job_id.clone(),
                    channel: handle.id().clone(),
                })
            }
        }
    }

    /// Probe every channel, evicting those that missed the previous probe
    /// or whose send fails.
    pub async fn sweep(&self) -> SweepReport {
        let mut bindings = self.bindings.write().await;
        let mut stale = Vec::new();
        let mut probed = 0;

        for (channel, binding) in bindings.by_channel.iter_mut() {
            if binding.awaiting_ack {
                stale.push(channel.clone());
                continue;
            }
            if binding.handle.send(WsMessage::heartbeat()).is_err() {
                stale.push(channel.clone());
                continue;
            }
            binding.awaiting_ack = true;
            probed += 1;
        }

        for channel in &stale {
            if let Some(binding) = bindings.remove_channel(channel) {
                warn!(job_id = %binding.job_id, channel = %channel, "Evicting unresponsive channel");
            }
        }
        set_registry_bindings(bindings.by_job.len());
        record_evictions("heartbeat", stale.len());

        SweepReport {
            probed,
            evicted: stale.len(),
        }
    }

    pub async fn len(&self) -> usize {
        self.bindings.read().await.by_job.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` flips.
    pub fn start_heartbeat(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so new channels get a full period
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let report = self.sweep().await;
                        if report.evicted > 0 {
                            info!(
                                probed = report.probed,
                                evicted = report.evicted,
                                "Heartbeat sweep evicted channels"
                            );
                        }
                    }
                }
            }
            debug!("Heartbeat task stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptgen_models::WsMessageType;

    fn channel(id: &str) -> (ChannelHandle, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelHandle::with_id(ChannelId::from(id), tx), rx)
    }

    #[tokio::test]
    async fn test_reregistration_supersedes_old_channel() {
        let registry = ConnectionRegistry::new();
        let job = JobId::from("J");
        let (c1, mut rx1) = channel("c1");
        let (c2, _rx2) = channel("c2");

        registry.register(&job, c1.clone()).await.unwrap();
        let ack = registry.register(&job, c2.clone()).await.unwrap();

        assert_eq!(ack.superseded, Some(ChannelId::from("c1")));
        assert_eq!(registry.lookup(&job).await, Some(c2));
        assert_eq!(registry.reverse_lookup(c1.id()).await, None);
        assert_eq!(registry.len().await, 1);

        let notice = rx1.recv().await.unwrap();
        assert_eq!(notice.message_type(), WsMessageType::Error);
    }

    #[tokio::test]
    async fn test_channel_switching_jobs_drops_old_binding() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx) = channel("c1");

        registry.register(&JobId::from("J1"), c1.clone()).await.unwrap();
        registry.register(&JobId::from("J2"), c1.clone()).await.unwrap();

        assert!(registry.lookup(&JobId::from("J1")).await.is_none());
        assert_eq!(registry.reverse_lookup(c1.id()).await, Some(JobId::from("J2")));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_same_pair_registration_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx) = channel("c1");
        let job = JobId::from("J1");

        registry.register(&job, c1.clone()).await.unwrap();
        let ack = registry.register(&job, c1.clone()).await.unwrap();

        assert!(ack.superseded.is_none());
        assert_eq!(registry.lookup(&job).await, Some(c1));
    }

    #[tokio::test]
    async fn test_blank_ids_are_rejected_without_mutation() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx) = channel("c1");
        let (blank, _rx2) = channel(" ");

        assert_eq!(
            registry.register(&JobId::from(""), c1).await,
            Err(RegistryError::EmptyJobId)
        );
        assert_eq!(
            registry.register(&JobId::from("J1"), blank).await,
            Err(RegistryError::EmptyChannel)
        );
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_channel_closed_unbinds_both_directions() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx) = channel("c1");
        let job = JobId::from("J1");
        registry.register(&job, c1.clone()).await.unwrap();

        assert_eq!(registry.on_channel_closed(c1.id()).await, Some(job.clone()));
        assert!(registry.lookup(&job).await.is_none());
        assert!(registry.reverse_lookup(c1.id()).await.is_none());

        // Unknown channel is a no-op
        assert_eq!(registry.on_channel_closed(&ChannelId::from("ghost")).await, None);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx) = channel("c1");
        let job = JobId::from("J1");
        registry.register(&job, c1).await.unwrap();

        assert_eq!(registry.unregister(&job).await, Some(ChannelId::from("c1")));
        assert_eq!(registry.unregister(&job).await, None);
        assert!(registry.reverse_lookup(&ChannelId::from("c1")).await.is_none());
    }

    #[tokio::test]
    async fn test_push_evicts_dead_channel() {
        let registry = ConnectionRegistry::new();
        let (c1, rx) = channel("c1");
        let job = JobId::from("J1");
        registry.register(&job, c1).await.unwrap();
        drop(rx);

        let err = registry.push(&job, WsMessage::heartbeat()).await.unwrap_err();
        assert!(matches!(err, PushError::ChannelGone { .. }));
        assert!(registry.is_empty().await);

        let err = registry.push(&job, WsMessage::heartbeat()).await.unwrap_err();
        assert_eq!(err, PushError::NotRegistered(job));
    }

    #[tokio::test]
    async fn test_sweep_evicts_channels_that_miss_a_probe() {
        let registry = ConnectionRegistry::new();
        let (c1, mut rx1) = channel("c1");
        let (c2, mut rx2) = channel("c2");
        registry.register(&JobId::from("J1"), c1.clone()).await.unwrap();
        registry.register(&JobId::from("J2"), c2.clone()).await.unwrap();

        let first = registry.sweep().await;
        assert_eq!(first, SweepReport { probed: 2, evicted: 0 });
        assert_eq!(rx1.recv().await.unwrap().message_type(), WsMessageType::Heartbeat);
        assert_eq!(rx2.recv().await.unwrap().message_type(), WsMessageType::Heartbeat);

        // Only c1 answers
        assert!(registry.heartbeat_ack(c1.id()).await);

        let second = registry.sweep().await;
        assert_eq!(second, SweepReport { probed: 1, evicted: 1 });
        assert!(registry.lookup(&JobId::from("J1")).await.is_some());
        assert!(registry.lookup(&JobId::from("J2")).await.is_none());
        assert!(!registry.heartbeat_ack(c2.id()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_task_stops_on_shutdown() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (c1, mut rx) = channel("c1");
        registry.register(&JobId::from("J1"), c1).await.unwrap();

        let (tx, shutdown) = watch::channel(false);
        let task = Arc::clone(&registry).start_heartbeat(Duration::from_secs(30), shutdown);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(rx.recv().await.unwrap().message_type(), WsMessageType::Heartbeat);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
