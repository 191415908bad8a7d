//! Agent coordination fabric
//!
//! Multiple stage agents can run concurrently inside one process. The
//! coordinator is their synchronization fabric: exclusive work claims,
//! all-or-nothing file locks, a last-writer-wins shared context map, and a
//! fan-out message bus with bounded buffers.
//!
//! The bus sheds load instead of blocking: when the central buffer or a
//! subscriber buffer is full, the message is dropped, a monotonic counter is
//! bumped, and a warning names the producer and message type. Producers
//! (subprocess activity, reviewer output) must never stall the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::CoordinatorSettings;

/// A message on the coordinator bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Agent id of the producer
    pub from: String,

    /// Free-form message type, e.g. "progress", "file_changed"
    pub message_type: String,

    #[serde(default)]
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(
        from: impl Into<String>,
        message_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            from: from.into(),
            message_type: message_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// An exclusive reservation of one unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkClaim {
    pub work_id: String,
    pub work_type: String,
    pub description: String,

    /// Files this work expects to touch
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

/// The coordination fabric shared by all agents in a run
pub struct Coordinator {
    /// Hot-read by publishers; lock-free
    running: AtomicBool,

    /// Monotonic count of messages shed by the bus
    dropped: Arc<AtomicU64>,

    subscriber_buffer_size: usize,

    tx: mpsc::Sender<AgentMessage>,
    rx: Mutex<Option<mpsc::Receiver<AgentMessage>>>,

    /// Shared with the dispatcher task, which outlives any one borrow
    subscribers: Arc<Mutex<HashMap<String, mpsc::Sender<AgentMessage>>>>,
    claims: Mutex<HashMap<String, (String, WorkClaim)>>,
    locks: Mutex<HashMap<PathBuf, String>>,
    context: Mutex<HashMap<String, serde_json::Value>>,

    shutdown: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(settings: &CoordinatorSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.message_buffer_size.max(1));
        let (shutdown, _) = watch::channel(false);

        Self {
            running: AtomicBool::new(false),
            dropped: Arc::new(AtomicU64::new(0)),
            subscriber_buffer_size: settings.subscriber_buffer_size.max(1),
            tx,
            rx: Mutex::new(Some(rx)),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            claims: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            context: Mutex::new(HashMap::new()),
            shutdown,
            dispatcher: Mutex::new(None),
        }
    }

    /// Spawn the dispatcher that drains the central channel and fans out to
    /// live subscribers. Idempotent; the second call is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(mut rx) = self.rx.lock().unwrap_or_else(|p| p.into_inner()).take() else {
            return;
        };

        let subscribers = Arc::clone(&self.subscribers);
        let dropped = Arc::clone(&self.dropped);
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        fan_out(&subscribers, &dropped, msg);
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        *self.dispatcher.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
    }

    /// Stop the dispatcher, close all subscriber channels, and clear every
    /// map so held references are released.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        self.claims.lock().unwrap_or_else(|p| p.into_inner()).clear();
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).clear();
        self.context
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    /// Publish a message onto the bus. Never blocks: a full central buffer
    /// drops the message and bumps the drop counter.
    pub fn publish(&self, msg: AgentMessage) {
        if !self.running.load(Ordering::Relaxed) {
            return;
        }

        if let Err(mpsc::error::TrySendError::Full(msg)) = self.tx.try_send(msg) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Dropping '{}' message from {}: central buffer full",
                msg.message_type,
                msg.from
            );
        }
    }

    /// Register a subscriber and return its bounded receive channel.
    /// Re-subscribing under the same agent id replaces the old channel.
    pub fn subscribe(&self, agent_id: &str) -> mpsc::Receiver<AgentMessage> {
        let (tx, rx) = mpsc::channel(self.subscriber_buffer_size);
        self.subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(agent_id.to_string(), tx);
        rx
    }

    /// Number of messages shed so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Atomically claim a unit of work. Returns false when another agent
    /// already holds the work id; re-claiming your own work succeeds.
    pub fn claim_work(&self, agent_id: &str, claim: WorkClaim) -> bool {
        let mut claims = self.claims.lock().unwrap_or_else(|p| p.into_inner());
        match claims.get(&claim.work_id) {
            Some((holder, _)) if holder != agent_id => false,
            _ => {
                claims.insert(claim.work_id.clone(), (agent_id.to_string(), claim));
                true
            }
        }
    }

    /// Release a work claim. Idempotent; releasing work held by someone else
    /// is a no-op.
    pub fn release_work(&self, work_id: &str, agent_id: &str) {
        let mut claims = self.claims.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((holder, _)) = claims.get(work_id) {
            if holder == agent_id {
                claims.remove(work_id);
            }
        }
    }

    /// Acquire locks on a set of paths, all-or-nothing. Fails when any path
    /// is held by another agent; paths already held by the caller count as
    /// acquired.
    pub fn lock_files(&self, agent_id: &str, paths: &[PathBuf]) -> bool {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        if paths
            .iter()
            .any(|p| locks.get(p).is_some_and(|holder| holder != agent_id))
        {
            return false;
        }
        for path in paths {
            locks.insert(path.clone(), agent_id.to_string());
        }
        true
    }

    /// Release file locks. Idempotent; paths held by other agents are left
    /// alone.
    pub fn unlock_files(&self, agent_id: &str, paths: &[PathBuf]) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        for path in paths {
            if locks.get(path).is_some_and(|holder| holder == agent_id) {
                locks.remove(path);
            }
        }
    }

    /// Release every lock and claim held by an agent (used on cancellation).
    pub fn release_agent(&self, agent_id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|_, holder| holder.as_str() != agent_id);
        self.claims
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|_, (holder, _)| holder.as_str() != agent_id);
    }

    /// Who holds a file lock, if anyone.
    pub fn lock_holder(&self, path: &Path) -> Option<String> {
        self.locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(path)
            .cloned()
    }

    /// Last-writer-wins shared context.
    pub fn set_context(&self, key: impl Into<String>, value: serde_json::Value) {
        self.context
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.into(), value);
    }

    pub fn get_context(&self, key: &str) -> Option<serde_json::Value> {
        self.context
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    /// Number of live work claims.
    pub fn claim_count(&self) -> usize {
        self.claims.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

/// Fan one message out to every live subscriber, shedding on full buffers.
fn fan_out(
    subscribers: &Mutex<HashMap<String, mpsc::Sender<AgentMessage>>>,
    dropped: &AtomicU64,
    msg: AgentMessage,
) {
    let subscribers = subscribers.lock().unwrap_or_else(|p| p.into_inner());
    for (agent_id, tx) in subscribers.iter() {
        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(msg.clone()) {
            dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Dropping '{}' message from {}: subscriber {} buffer full",
                msg.message_type,
                msg.from,
                agent_id
            );
        }
    }
}
