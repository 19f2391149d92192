//! Web Session Gateway, core-facing half (spec §4.G): per-Instance content
//! fan-out and input injection, decoupled from screen capture.
//!
//! Grounded on `iepathos-prodigy/src/monitor/dashboard.rs`'s
//! `DashboardState`/broadcast-channel shape (the teacher has no web stack at
//! all; `axum`/`tower-http` are pulled in from that repo for this module)
//! and `other_examples/bf0d0c34_layercodedev-pigs__src-dashboard.rs.rs`'s
//! `session_stream` for the real `WebSocketUpgrade` + `tokio::select!`
//! fan-out idiom the teacher's own handler only stubs.

pub mod tasks;
pub mod ws;

use crate::error::GatewayError;
use crate::store::InstanceStatus;
use crate::supervisor::Supervisor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use self::tasks::Task;

const SUBSCRIBER_QUEUE_CAPACITY: usize = 20;
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const TASK_CACHE_TTL: Duration = Duration::from_secs(5);
const GET_CONTENT_RETRIES: u32 = 3;
const GET_CONTENT_RETRY_SPACING: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize)]
pub struct TerminalUpdate {
    pub title: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: InstanceStatus,
    pub has_prompt: bool,
}

/// Returned from `subscribe` so the caller can later `unsubscribe` the
/// exact queue it was handed.
pub struct SubscriptionHandle {
    pub title: String,
    id: Uuid,
}

struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<TerminalUpdate>,
}

#[derive(Default)]
struct PerTitleState {
    content: String,
    hash: Option<[u8; 32]>,
    subscribers: Vec<Subscriber>,
    task_cache: Option<(Instant, Vec<Task>)>,
}

/// Single mutex protecting the four per-title maps (content, hash,
/// subscribers, task cache) described in spec §4.G; lock scope excludes
/// subscriber channel sends, which happen after the guard is dropped.
pub struct TerminalMonitor {
    supervisor: Arc<Supervisor>,
    state: Mutex<HashMap<String, PerTitleState>>,
}

impl TerminalMonitor {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh queue; immediately enqueues the cached screen if one exists.
    pub async fn subscribe(&self, title: &str) -> (SubscriptionHandle, mpsc::Receiver<TerminalUpdate>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = Uuid::new_v4();

        let mut state = self.state.lock().await;
        let entry = state.entry(title.to_string()).or_default();

        if !entry.content.is_empty() {
            let snapshot = entry.content.clone();
            let (status, has_prompt) = match self.supervisor.status_and_auto_yes(title).await {
                Some((status, auto_yes)) => {
                    let sentinel = self
                        .supervisor
                        .prompt_sentinel_present(title, &snapshot)
                        .await
                        .unwrap_or(false);
                    (status, auto_yes && sentinel)
                }
                None => (InstanceStatus::Loading, false),
            };
            let _ = tx.try_send(TerminalUpdate {
                title: title.to_string(),
                content: snapshot,
                timestamp: Utc::now(),
                status,
                has_prompt,
            });
        }

        entry.subscribers.push(Subscriber { id, tx });
        (SubscriptionHandle { title: title.to_string(), id }, rx)
    }

    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.get_mut(&handle.title) {
            entry.subscribers.retain(|s| s.id != handle.id);
        }
    }

    /// Cached content, or one live `Preview()` with up to 3 retries on a
    /// miss. An empty preview is a valid, non-error result.
    pub async fn get_content(&self, title: &str) -> Result<String, GatewayError> {
        {
            let state = self.state.lock().await;
            if let Some(entry) = state.get(title) {
                if !entry.content.is_empty() {
                    return Ok(entry.content.clone());
                }
            }
        }

        let mut last_content = String::new();
        for attempt in 0..GET_CONTENT_RETRIES {
            match self.supervisor.preview(title).await {
                Ok(content) => {
                    last_content = content;
                    if !last_content.is_empty() {
                        break;
                    }
                }
                Err(e) => {
                    if attempt + 1 == GET_CONTENT_RETRIES {
                        return Err(map_supervisor_err(e));
                    }
                }
            }
            tokio::time::sleep(GET_CONTENT_RETRY_SPACING).await;
        }

        let mut state = self.state.lock().await;
        let entry = state.entry(title.to_string()).or_default();
        entry.content = last_content.clone();
        Ok(last_content)
    }

    pub async fn current_status(&self, title: &str) -> Option<InstanceStatus> {
        self.supervisor
            .status_and_auto_yes(title)
            .await
            .map(|(status, _)| status)
    }

    pub async fn send_input(&self, title: &str, text: &str) -> Result<(), GatewayError> {
        self.supervisor
            .send_input(title, text)
            .await
            .map_err(map_supervisor_err)
    }

    pub async fn resize_terminal(&self, title: &str, cols: u16, rows: u16) -> Result<(), GatewayError> {
        self.supervisor
            .resize(title, cols, rows)
            .await
            .map_err(map_supervisor_err)
    }

    /// Extract numbered task lines from the cached screen, refreshing the
    /// per-title cache when it is missing or older than 5 s.
    pub async fn get_tasks(&self, title: &str) -> Vec<Task> {
        let mut state = self.state.lock().await;
        let entry = state.entry(title.to_string()).or_default();

        if let Some((cached_at, cached)) = &entry.task_cache {
            if cached_at.elapsed() < TASK_CACHE_TTL {
                return cached.clone();
            }
        }

        let parsed = tasks::extract_tasks(&entry.content);
        entry.task_cache = Some((Instant::now(), parsed.clone()));
        parsed
    }

    /// 2 Hz polling loop: for every Started non-Paused Instance, capture,
    /// skip empty captures, hash, and publish on change.
    pub async fn run_poll_loop(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            for title in self.supervisor.started_not_paused_titles().await {
                if let Err(e) = self.poll_one(&title).await {
                    warn!(title = %title, error = %e, "gateway poll failed");
                }
            }
        }
    }

    async fn poll_one(&self, title: &str) -> Result<(), GatewayError> {
        let content = self.supervisor.preview(title).await.map_err(map_supervisor_err)?;
        if content.is_empty() {
            return Ok(());
        }

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let hash: [u8; 32] = hasher.finalize().into();

        let targets: Vec<(Uuid, mpsc::Sender<TerminalUpdate>)> = {
            let mut state = self.state.lock().await;
            let entry = state.entry(title.to_string()).or_default();
            if entry.hash == Some(hash) {
                return Ok(());
            }
            entry.hash = Some(hash);
            entry.content = content.clone();
            entry.task_cache = None;
            entry
                .subscribers
                .iter()
                .map(|s| (s.id, s.tx.clone()))
                .collect()
        };

        let (status, auto_yes) = self
            .supervisor
            .status_and_auto_yes(title)
            .await
            .unwrap_or((InstanceStatus::Loading, false));
        let has_prompt = auto_yes
            && self
                .supervisor
                .prompt_sentinel_present(title, &content)
                .await
                .unwrap_or(false);

        let update = TerminalUpdate {
            title: title.to_string(),
            content,
            timestamp: Utc::now(),
            status,
            has_prompt,
        };

        // Sends happen with no lock held, so a slow or backed-up subscriber
        // never stalls the poll loop's other titles.
        let mut dead = Vec::new();
        for (id, tx) in targets {
            // A full queue drops the update for that subscriber rather than
            // blocking the fan-out; a closed queue is pruned below.
            if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(update.clone()) {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut state = self.state.lock().await;
            if let Some(entry) = state.get_mut(title) {
                entry.subscribers.retain(|s| !dead.contains(&s.id));
            }
        }

        Ok(())
    }
}

fn map_supervisor_err(e: crate::error::SupervisorError) -> GatewayError {
    use crate::error::SupervisorError;
    match e {
        SupervisorError::NotFound(title) => GatewayError::NoSuchInstance(title),
        SupervisorError::Instance(ie) => GatewayError::Instance(ie),
        other => GatewayError::Instance(crate::error::InstanceError::Composite(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Paths, SupervisorConfig};
    use tempfile::TempDir;

    fn monitor(dir: &TempDir) -> TerminalMonitor {
        let paths = Paths::with_root(dir.path().to_path_buf());
        let supervisor = Arc::new(Supervisor::new(&paths, SupervisorConfig::default()));
        TerminalMonitor::new(supervisor)
    }

    #[tokio::test]
    async fn subscribe_on_unknown_title_gets_no_immediate_message() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir);
        let (_handle, mut rx) = monitor.subscribe("nope").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn get_tasks_on_empty_cache_returns_empty() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir);
        let tasks = monitor.get_tasks("nope").await;
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_the_named_handle() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir);
        let (handle_a, _rx_a) = monitor.subscribe("demo").await;
        let (_handle_b, _rx_b) = monitor.subscribe("demo").await;

        monitor.unsubscribe(&handle_a).await;

        let state = monitor.state.lock().await;
        assert_eq!(state.get("demo").unwrap().subscribers.len(), 1);
    }
}
