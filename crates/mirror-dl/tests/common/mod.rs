//! In-memory work queue and helpers shared by the engine tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mirror_dl::{
    EmptyDir, EngineEvent, ExpectedDigest, Overview, StorageError, WorkItem, WorkQueue,
};
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct Entry {
    pub item: WorkItem,
    pub done: bool,
    pub taken: bool,
}

#[derive(Default)]
struct State {
    files: Vec<Entry>,
    dirs: Vec<(EmptyDir, bool)>,
    base_url: String,
}

/// Vec-backed queue; claims are exclusive because every call holds the lock
#[derive(Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
}

impl MemoryQueue {
    pub fn new(base_url: &str) -> Self {
        let queue = Self::default();
        queue.state.lock().unwrap().base_url = base_url.to_string();
        queue
    }

    pub fn add_file(&self, path: &str, body: &[u8]) {
        let digest = ExpectedDigest::new("sha1", sha1_hex(body));
        self.add_item(WorkItem::new(path, body.len() as u64, digest));
    }

    pub fn add_item(&self, item: WorkItem) {
        self.state.lock().unwrap().files.push(Entry {
            item,
            done: false,
            taken: false,
        });
    }

    pub fn add_dir(&self, path: &str) {
        self.state.lock().unwrap().dirs.push((
            EmptyDir {
                path: path.to_string(),
            },
            false,
        ));
    }

    pub fn mark_all_done(&self) {
        for entry in self.state.lock().unwrap().files.iter_mut() {
            entry.done = true;
        }
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.state.lock().unwrap().files.clone()
    }

    pub fn done_count(&self) -> usize {
        self.entries().iter().filter(|e| e.done).count()
    }

    pub fn taken_count(&self) -> usize {
        self.entries().iter().filter(|e| e.taken).count()
    }

    pub fn dirs_done(&self) -> usize {
        self.state.lock().unwrap().dirs.iter().filter(|d| d.1).count()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn overview(&self) -> Result<Overview, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(Overview {
            name: "test mirror".to_string(),
            total_files: state.files.len() as u64,
            total_size: state.files.iter().map(|e| e.item.size).sum(),
            base_url: state.base_url.clone(),
        })
    }

    async fn downloaded_size(&self) -> Result<u64, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.files.iter().filter(|e| e.done).map(|e| e.item.size).sum())
    }

    async fn downloaded_files(&self) -> Result<u64, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.files.iter().filter(|e| e.done).count() as u64)
    }

    async fn claim_next(&self) -> Result<Option<WorkItem>, StorageError> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .files
            .iter_mut()
            .find(|e| !e.done && !e.taken)
            .map(|e| {
                e.taken = true;
                e.item.clone()
            }))
    }

    async fn claim_batch(&self, limit: usize) -> Result<Vec<WorkItem>, StorageError> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .files
            .iter_mut()
            .filter(|e| !e.done && !e.taken)
            .take(limit)
            .map(|e| {
                e.taken = true;
                e.item.clone()
            })
            .collect())
    }

    async fn complete(&self, item: &WorkItem) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.files.iter_mut().find(|e| e.item.path == item.path) {
            e.done = true;
            e.taken = false;
        }
        Ok(())
    }

    async fn release_claim(&self, item: &WorkItem) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.files.iter_mut().find(|e| e.item.path == item.path) {
            e.taken = false;
        }
        Ok(())
    }

    async fn release_all_claims(&self) -> Result<(), StorageError> {
        for e in self.state.lock().unwrap().files.iter_mut() {
            e.taken = false;
        }
        Ok(())
    }

    async fn reset_all(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        for e in state.files.iter_mut() {
            e.taken = false;
            e.done = false;
        }
        for d in state.dirs.iter_mut() {
            d.1 = false;
        }
        Ok(())
    }

    async fn claim_next_dir(&self) -> Result<Option<EmptyDir>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.dirs.iter().find(|d| !d.1).map(|d| d.0.clone()))
    }

    async fn mark_dir_done(&self, dir: &EmptyDir) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if let Some(d) = state.dirs.iter_mut().find(|d| d.0.path == dir.path) {
            d.1 = true;
        }
        Ok(())
    }
}

pub fn sha1_hex(body: &[u8]) -> String {
    hex::encode(Sha1::digest(body))
}

/// Deterministic payload of `len` bytes
pub fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Collect events until `Finished` arrives
pub async fn wait_finished(
    rx: &mut mpsc::UnboundedReceiver<EngineEvent>,
    limit: Duration,
) -> (u64, Vec<EngineEvent>) {
    let mut seen = Vec::new();
    let failures = tokio::time::timeout(limit, async {
        while let Some(event) = rx.recv().await {
            let finished = match &event {
                EngineEvent::Finished { failures } => Some(*failures),
                _ => None,
            };
            seen.push(event);
            if let Some(failures) = finished {
                return failures;
            }
        }
        panic!("event channel closed before finished");
    })
    .await
    .expect("run did not finish in time");
    (failures, seen)
}

/// Collect events until one matches `wanted`
pub async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<EngineEvent>,
    limit: Duration,
    wanted: impl Fn(&EngineEvent) -> bool,
) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(limit, async {
        while let Some(event) = rx.recv().await {
            let hit = wanted(&event);
            seen.push(event);
            if hit {
                return;
            }
        }
        panic!("event channel closed before the awaited event");
    })
    .await
    .expect("awaited event did not arrive in time");
    seen
}

/// Drain whatever is already queued without waiting
pub fn drain(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    seen
}
