use crate::adapters::local::EventHub;
use crate::config::default_output_path;
use crate::domain::jobs::{JobStatus, QueueEvent, StatusEntry};
use crate::domain::stems::Backend;
use crate::ports::store::KeyValueStore;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

const VIDEOS_DB_KEY: &str = "videosDb";
const OUTPUT_PATH_KEY: &str = "outputPath";
const BACKEND_KEY: &str = "pyTorchBackend";
const DONATE_KEY: &str = "canShowDonatePopup";

/// Finished jobs needed before the donation prompt is suggested.
pub const DONATE_THRESHOLD: usize = 3;

/// Status of every job known to this process, plus the user settings.
///
/// Only `done` entries are written to the store; everything else lives for
/// the lifetime of the process. Store writes happen outside the entries lock
/// and only when the `done` subset changed.
pub struct StatusStore {
    store: Arc<dyn KeyValueStore>,
    hub: Arc<EventHub>,
    entries: Mutex<HashMap<String, StatusEntry>>,
    /// Bumped under the entries lock for every snapshot taken.
    generation: AtomicU64,
    /// Generation of the last snapshot handed to the store.
    written: Mutex<u64>,
    donate_sent: AtomicBool,
}

/// The persisted form of the map at one point in time.
struct Snapshot {
    generation: u64,
    finished: Value,
}

impl StatusStore {
    /// Load persisted results, dropping those whose output folder is gone.
    pub fn load(store: Arc<dyn KeyValueStore>, hub: Arc<EventHub>) -> Self {
        let loaded: HashMap<String, StatusEntry> = match store.get(VIDEOS_DB_KEY) {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Discarding unreadable status record: {}", e);
                HashMap::new()
            }),
            None => HashMap::new(),
        };
        let total = loaded.len();
        let entries: HashMap<_, _> = loaded
            .into_iter()
            .filter(|(_, entry)| entry.path.as_deref().is_some_and(Path::exists))
            .collect();
        if entries.len() != total {
            info!("Pruned {} stale status entries", total - entries.len());
        }

        if let Err(e) = store.set(VIDEOS_DB_KEY, snapshot(&entries)) {
            error!("Failed to persist status record: {}", e);
        }

        Self {
            store,
            hub,
            entries: Mutex::new(entries),
            generation: AtomicU64::new(0),
            written: Mutex::new(0),
            donate_sent: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StatusEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn get_status(&self, id: &str) -> Option<JobStatus> {
        self.lock().get(id).map(|entry| entry.status)
    }

    pub fn get_path(&self, id: &str) -> Option<PathBuf> {
        self.lock().get(id).and_then(|entry| entry.path.clone())
    }

    pub fn get(&self, id: &str) -> Option<StatusEntry> {
        self.lock().get(id).cloned()
    }

    /// Record a transition, persist the finished subset and notify subscribers.
    pub fn set_status(&self, id: &str, status: JobStatus, path: Option<PathBuf>) {
        let snapshot = {
            let mut entries = self.lock();
            let previous = entries.insert(
                id.to_string(),
                StatusEntry {
                    status,
                    path: path.clone(),
                },
            );
            let finished_changed = status == JobStatus::Done
                || previous.is_some_and(|entry| entry.status == JobStatus::Done);
            finished_changed.then(|| self.take_snapshot(&entries))
        };
        if let Some(snapshot) = snapshot {
            self.save_finished(snapshot);
        }

        self.hub.publish(QueueEvent::Status {
            id: id.to_string(),
            status: Some(status),
            path,
        });
    }

    /// Forget a job. Unknown ids are ignored.
    pub fn clear(&self, id: &str) {
        let snapshot = {
            let mut entries = self.lock();
            match entries.remove(id) {
                None => return,
                Some(entry) if entry.status == JobStatus::Done => {
                    Some(self.take_snapshot(&entries))
                }
                Some(_) => None,
            }
        };
        if let Some(snapshot) = snapshot {
            self.save_finished(snapshot);
        }

        self.hub.publish(QueueEvent::Status {
            id: id.to_string(),
            status: None,
            path: None,
        });
    }

    /// Must be called with the entries lock held, so generations follow
    /// the order of the mutations.
    fn take_snapshot(&self, entries: &HashMap<String, StatusEntry>) -> Snapshot {
        Snapshot {
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            finished: snapshot(entries),
        }
    }

    fn save_finished(&self, snapshot: Snapshot) {
        let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        // A newer snapshot already reached the store.
        if snapshot.generation <= *written {
            return;
        }
        let done = snapshot.finished.as_object().map_or(0, |m| m.len());
        if let Err(e) = self.store.set(VIDEOS_DB_KEY, snapshot.finished) {
            error!("Failed to persist status record: {}", e);
        }
        *written = snapshot.generation;
        drop(written);

        if done >= DONATE_THRESHOLD
            && self.can_show_donate_popup()
            && !self.donate_sent.swap(true, Ordering::SeqCst)
        {
            self.hub.publish(QueueEvent::Donate {
                show_donate_popup: true,
            });
        }
    }

    pub fn output_path(&self) -> PathBuf {
        match self.store.get(OUTPUT_PATH_KEY) {
            Some(Value::String(path)) if !path.is_empty() => PathBuf::from(path),
            _ => default_output_path(),
        }
    }

    pub fn set_output_path(&self, path: &Path) {
        let value = Value::String(path.to_string_lossy().into_owned());
        if let Err(e) = self.store.set(OUTPUT_PATH_KEY, value) {
            error!("Failed to save output path: {}", e);
        }
    }

    pub fn backend(&self) -> Backend {
        self.store
            .get(BACKEND_KEY)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    pub fn set_backend(&self, backend: Backend) {
        let value = serde_json::to_value(backend).unwrap_or(Value::Null);
        if let Err(e) = self.store.set(BACKEND_KEY, value) {
            error!("Failed to save compute backend: {}", e);
        }
    }

    /// Only an explicit `false` opts out.
    pub fn can_show_donate_popup(&self) -> bool {
        self.store.get(DONATE_KEY) != Some(Value::Bool(false))
    }

    pub fn set_can_show_donate_popup(&self, allowed: bool) {
        if let Err(e) = self.store.set(DONATE_KEY, Value::Bool(allowed)) {
            error!("Failed to save donation prompt setting: {}", e);
        }
    }
}

/// The persisted form: `done` entries only.
fn snapshot(entries: &HashMap<String, StatusEntry>) -> Value {
    let finished: HashMap<&String, &StatusEntry> = entries
        .iter()
        .filter(|(_, entry)| entry.status == JobStatus::Done)
        .collect();
    serde_json::to_value(finished).unwrap_or_else(|_| Value::Object(Default::default()))
}
