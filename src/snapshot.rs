//! Named, tagged, timestamped synth state snapshots.
//!
//! A `SnapshotStore` sits on top of a `SnapshotBackend`. The store's contract
//! is the same whichever backend is active; backends only decide where the
//! snapshots live.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::SynthState;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    state: SynthState,
    timestamp: u64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
}

impl Snapshot {
    /// Create a snapshot stamped with the current time.
    pub fn new(state: SynthState, description: &str, tags: &[String]) -> Self {
        Self {
            state,
            timestamp: now_millis(),
            description: description.to_owned(),
            tags: normalize_tags(tags),
        }
    }

    pub fn state(&self) -> &SynthState {
        &self.state
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    fn validate(&self, name: &str) -> Result<(), SnapshotError> {
        if name.trim().is_empty() {
            return Err(SnapshotError::EmptyName)
        }
        self.state.validate().map_err(|reason| SnapshotError::InvalidSnapshot {
            name: name.to_owned(),
            reason,
        })
    }
}

pub type SnapshotMap = BTreeMap<String, Snapshot>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no snapshot named {0:?}")]
    NotFound(String),
    #[error("a snapshot named {0:?} already exists")]
    AlreadyExists(String),
    #[error("snapshot name is empty")]
    EmptyName,
    #[error("invalid snapshot document: {0}")]
    InvalidDocument(String),
    #[error("invalid snapshot {name:?}: {reason}")]
    InvalidSnapshot { name: String, reason: String },
    #[error("snapshot file: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding snapshots: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decoding snapshots: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("remote snapshot store: {0}")]
    Remote(String),
}

/// Storage for snapshots, keyed by name.
pub trait SnapshotBackend {
    fn list(&self) -> Result<SnapshotMap, SnapshotError>;
    fn get(&self, name: &str) -> Result<Option<Snapshot>, SnapshotError>;
    /// Insert or overwrite.
    fn put(&mut self, name: &str, snapshot: Snapshot) -> Result<(), SnapshotError>;
    /// Remove, returning the old entry.
    fn delete(&mut self, name: &str) -> Result<Option<Snapshot>, SnapshotError>;

    /// Errors from background work since the last call.
    fn poll_errors(&mut self) -> Vec<SnapshotError> {
        Vec::new()
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    snapshots: SnapshotMap,
}

impl SnapshotBackend for MemoryBackend {
    fn list(&self) -> Result<SnapshotMap, SnapshotError> {
        Ok(self.snapshots.clone())
    }

    fn get(&self, name: &str) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self.snapshots.get(name).cloned())
    }

    fn put(&mut self, name: &str, snapshot: Snapshot) -> Result<(), SnapshotError> {
        self.snapshots.insert(name.to_owned(), snapshot);
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self.snapshots.remove(name))
    }
}

/// On-device store: the whole map in one MessagePack file, rewritten on
/// every change.
pub struct LocalBackend {
    path: PathBuf,
    snapshots: SnapshotMap,
}

impl LocalBackend {
    /// Open a snapshot file. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref().to_path_buf();
        let snapshots = match fs::read(&path) {
            Ok(bytes) => rmp_serde::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => SnapshotMap::new(),
            Err(e) => return Err(e.into()),
        };
        log::info!(target: "snapshot", "opened {} with {} snapshots",
            path.display(), snapshots.len());
        Ok(Self { path, snapshots })
    }

    fn flush(&self) -> Result<(), SnapshotError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(&self.path, rmp_serde::to_vec_named(&self.snapshots)?)?;
        Ok(())
    }
}

impl SnapshotBackend for LocalBackend {
    fn list(&self) -> Result<SnapshotMap, SnapshotError> {
        Ok(self.snapshots.clone())
    }

    fn get(&self, name: &str) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self.snapshots.get(name).cloned())
    }

    fn put(&mut self, name: &str, snapshot: Snapshot) -> Result<(), SnapshotError> {
        self.snapshots.insert(name.to_owned(), snapshot);
        self.flush()
    }

    fn delete(&mut self, name: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let old = self.snapshots.remove(name);
        if old.is_some() {
            self.flush()?;
        }
        Ok(old)
    }
}

/// A snapshot as held by a remote service.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteSnapshot {
    /// Server-assigned ID.
    pub id: String,
    /// Server-side creation time, milliseconds since the Unix epoch.
    pub created_at: u64,
    pub name: String,
    pub snapshot: Snapshot,
}

/// Per-user remote snapshot storage. Calls may block.
pub trait SnapshotService: Send + 'static {
    fn create(&mut self, name: &str, snapshot: &Snapshot) -> Result<RemoteSnapshot, SnapshotError>;
    fn list(&mut self) -> Result<Vec<RemoteSnapshot>, SnapshotError>;
    fn delete(&mut self, id: &str) -> Result<(), SnapshotError>;
}

enum RemoteOp {
    Put(String, Snapshot),
    Delete(String),
    Flush(Sender<()>),
}

/// Remote store. Reads come from a local cache; writes are applied to the
/// cache immediately and sent to the service on a worker thread. Failures
/// are collected with `poll_errors`.
pub struct RemoteBackend {
    cache: SnapshotMap,
    tx: Sender<RemoteOp>,
    errors: Receiver<SnapshotError>,
}

impl RemoteBackend {
    /// Fetch the current listing, then hand the service to a worker thread.
    pub fn new<S: SnapshotService>(mut service: S) -> Result<Self, SnapshotError> {
        let listing = service.list()?;
        let mut ids = BTreeMap::new();
        let mut cache = SnapshotMap::new();
        for remote in listing {
            ids.insert(remote.name.clone(), remote.id);
            cache.insert(remote.name, remote.snapshot);
        }

        let (tx, rx) = channel();
        let (err_tx, errors) = channel();
        thread::Builder::new()
            .name(String::from("snapshot sync"))
            .spawn(move || sync_worker(service, ids, rx, err_tx))?;

        Ok(Self { cache, tx, errors })
    }

    /// Block until every write sent so far has been attempted.
    pub fn flush(&self) {
        let (done_tx, done_rx) = channel();
        if self.tx.send(RemoteOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }

    fn send(&self, op: RemoteOp) -> Result<(), SnapshotError> {
        self.tx.send(op)
            .map_err(|_| SnapshotError::Remote(String::from("sync worker stopped")))
    }
}

fn sync_worker<S: SnapshotService>(
    mut service: S,
    mut ids: BTreeMap<String, String>,
    rx: Receiver<RemoteOp>,
    err_tx: Sender<SnapshotError>,
) {
    let report = |result: Result<(), SnapshotError>| {
        if let Err(e) = result {
            log::warn!(target: "snapshot", "{e}");
            let _ = err_tx.send(e);
        }
    };

    for op in rx {
        match op {
            RemoteOp::Put(name, snapshot) => {
                // the service has no update; replace the old entry
                if let Some(id) = ids.remove(&name) {
                    report(service.delete(&id));
                }
                match service.create(&name, &snapshot) {
                    Ok(remote) => {
                        ids.insert(name, remote.id);
                    }
                    Err(e) => report(Err(e)),
                }
            }
            RemoteOp::Delete(name) => {
                if let Some(id) = ids.remove(&name) {
                    report(service.delete(&id));
                }
            }
            RemoteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

impl SnapshotBackend for RemoteBackend {
    fn list(&self) -> Result<SnapshotMap, SnapshotError> {
        Ok(self.cache.clone())
    }

    fn get(&self, name: &str) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self.cache.get(name).cloned())
    }

    fn put(&mut self, name: &str, snapshot: Snapshot) -> Result<(), SnapshotError> {
        self.cache.insert(name.to_owned(), snapshot.clone());
        self.send(RemoteOp::Put(name.to_owned(), snapshot))
    }

    fn delete(&mut self, name: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let old = self.cache.remove(name);
        if old.is_some() {
            self.send(RemoteOp::Delete(name.to_owned()))?;
        }
        Ok(old)
    }

    fn poll_errors(&mut self) -> Vec<SnapshotError> {
        self.errors.try_iter().collect()
    }
}

/// Who is using the store.
pub enum Session<S: SnapshotService> {
    Anonymous,
    Authenticated(S),
}

pub struct SnapshotStore {
    backend: Box<dyn SnapshotBackend>,
}

impl SnapshotStore {
    pub fn new(backend: Box<dyn SnapshotBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::default()))
    }

    pub fn local(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        Ok(Self::new(Box::new(LocalBackend::open(path)?)))
    }

    pub fn remote<S: SnapshotService>(service: S) -> Result<Self, SnapshotError> {
        Ok(Self::new(Box::new(RemoteBackend::new(service)?)))
    }

    /// Remote store for authenticated sessions, otherwise the local file.
    pub fn for_session<S: SnapshotService>(session: Session<S>, local_path: impl AsRef<Path>
    ) -> Result<Self, SnapshotError> {
        match session {
            Session::Anonymous => Self::local(local_path),
            Session::Authenticated(service) => Self::remote(service),
        }
    }

    pub fn names(&self) -> Result<Vec<String>, SnapshotError> {
        Ok(self.backend.list()?.into_keys().collect())
    }

    pub fn list(&self) -> Result<SnapshotMap, SnapshotError> {
        self.backend.list()
    }

    pub fn get(&self, name: &str) -> Result<Snapshot, SnapshotError> {
        self.backend.get(name)?.ok_or_else(|| SnapshotError::NotFound(name.to_owned()))
    }

    /// Create or overwrite a snapshot, stamped with the current time.
    pub fn save(&mut self, name: &str, state: &SynthState, description: &str, tags: &[String]
    ) -> Result<(), SnapshotError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SnapshotError::EmptyName)
        }
        self.backend.put(name, Snapshot::new(state.clone(), description, tags))?;
        log::info!(target: "snapshot", "saved {name:?}");
        Ok(())
    }

    /// The stored state for a name. Applying it is up to the caller.
    pub fn load(&self, name: &str) -> Result<SynthState, SnapshotError> {
        Ok(self.get(name)?.state)
    }

    /// Remove a snapshot, returning it so the caller can offer an undo.
    pub fn delete(&mut self, name: &str) -> Result<Snapshot, SnapshotError> {
        let old = self.backend.delete(name)?
            .ok_or_else(|| SnapshotError::NotFound(name.to_owned()))?;
        log::info!(target: "snapshot", "deleted {name:?}");
        Ok(old)
    }

    /// Put back a deleted snapshot unchanged.
    pub fn restore(&mut self, name: &str, snapshot: Snapshot) -> Result<(), SnapshotError> {
        snapshot.validate(name)?;
        self.backend.put(name, snapshot)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), SnapshotError> {
        let to = to.trim();
        if to.is_empty() {
            return Err(SnapshotError::EmptyName)
        }
        if from == to {
            return self.get(from).map(|_| ())
        }
        if self.backend.get(to)?.is_some() {
            return Err(SnapshotError::AlreadyExists(to.to_owned()))
        }
        let snapshot = self.get(from)?;
        self.backend.put(to, snapshot)?;
        self.backend.delete(from)?;
        Ok(())
    }

    pub fn set_description(&mut self, name: &str, description: &str) -> Result<(), SnapshotError> {
        let mut snapshot = self.get(name)?;
        snapshot.description = description.to_owned();
        self.backend.put(name, snapshot)
    }

    pub fn set_tags(&mut self, name: &str, tags: &[String]) -> Result<(), SnapshotError> {
        let mut snapshot = self.get(name)?;
        snapshot.tags = normalize_tags(tags);
        self.backend.put(name, snapshot)
    }

    /// The whole store as a JSON document.
    pub fn export_snapshots(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(&self.backend.list()?)?)
    }

    /// Merge snapshots into the store, overwriting on name collisions.
    /// Nothing is written unless every entry is valid.
    pub fn import_snapshots(&mut self, snapshots: SnapshotMap) -> Result<usize, SnapshotError> {
        for (name, snapshot) in &snapshots {
            snapshot.validate(name)?;
        }
        let count = snapshots.len();
        for (name, snapshot) in snapshots {
            self.backend.put(&name, snapshot)?;
        }
        log::info!(target: "snapshot", "imported {count} snapshots");
        Ok(count)
    }

    /// Parse, validate and merge an exported document.
    pub fn import_document(&mut self, json: &str) -> Result<usize, SnapshotError> {
        self.import_snapshots(parse_document(json)?)
    }

    /// Names in `incoming` that already exist in the store.
    pub fn conflicts(&self, incoming: &SnapshotMap) -> Result<Vec<String>, SnapshotError> {
        let existing = self.backend.list()?;
        Ok(incoming.keys().filter(|name| existing.contains_key(*name)).cloned().collect())
    }

    /// Errors from background persistence since the last call.
    pub fn poll_errors(&mut self) -> Vec<SnapshotError> {
        self.backend.poll_errors()
    }
}

/// Parse and validate an exported document without touching any store.
pub fn parse_document(json: &str) -> Result<SnapshotMap, SnapshotError> {
    let snapshots: SnapshotMap = serde_json::from_str(json)
        .map_err(|e| SnapshotError::InvalidDocument(e.to_string()))?;
    for (name, snapshot) in &snapshots {
        snapshot.validate(name)?;
    }
    Ok(snapshots)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the existing snapshot.
    Skip,
    /// Replace the existing snapshot.
    Overwrite,
    /// Import under a fresh name.
    Rename,
}

/// Rewrite an incoming set so that importing it applies `resolution` to
/// names already in `existing`.
pub fn resolve_conflicts(
    incoming: SnapshotMap,
    existing: &SnapshotMap,
    resolution: ConflictResolution,
) -> SnapshotMap {
    let mut taken: Vec<String> = existing.keys().chain(incoming.keys()).cloned().collect();
    let mut resolved = SnapshotMap::new();

    for (name, snapshot) in incoming {
        if !existing.contains_key(&name) {
            resolved.insert(name, snapshot);
            continue
        }
        match resolution {
            ConflictResolution::Skip => (),
            ConflictResolution::Overwrite => {
                resolved.insert(name, snapshot);
            }
            ConflictResolution::Rename => {
                let mut i = 2;
                let mut fresh = format!("{name} ({i})");
                while taken.contains(&fresh) {
                    i += 1;
                    fresh = format!("{name} ({i})");
                }
                taken.push(fresh.clone());
                resolved.insert(fresh, snapshot);
            }
        }
    }

    resolved
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn tags(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn filled_store() -> SnapshotStore {
        let mut store = SnapshotStore::in_memory();
        let mut state = SynthState::default();
        store.save("init", &state, "default patch", &tags(&["Bass", "dark", "bass"])).unwrap();
        state.bpm = 90.0;
        state.filter_cutoff = 800.0;
        store.save("slow", &state, "", &[]).unwrap();
        store
    }

    #[test]
    fn test_save_and_load() {
        let store = filled_store();
        assert_eq!(store.names().unwrap(), vec!["init", "slow"]);
        assert_eq!(store.load("slow").unwrap().bpm, 90.0);
        let init = store.get("init").unwrap();
        assert_eq!(init.tags(), ["bass", "dark"]);
        assert!(init.timestamp() > 0);
        assert!(matches!(store.load("nope"), Err(SnapshotError::NotFound(_))));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut store = SnapshotStore::in_memory();
        let err = store.save("  ", &SynthState::default(), "", &[]);
        assert!(matches!(err, Err(SnapshotError::EmptyName)));
    }

    #[test]
    fn test_metadata_edits_keep_state() {
        let mut store = filled_store();
        let before = store.get("slow").unwrap();
        store.set_description("slow", "chill").unwrap();
        store.set_tags("slow", &tags(&["Lofi"])).unwrap();
        let after = store.get("slow").unwrap();
        assert_eq!(after.description(), "chill");
        assert_eq!(after.tags(), ["lofi"]);
        assert_eq!(after.state(), before.state());
        assert_eq!(after.timestamp(), before.timestamp());
    }

    #[test]
    fn test_delete_and_restore() {
        let mut store = filled_store();
        let removed = store.delete("slow").unwrap();
        assert_eq!(store.names().unwrap(), vec!["init"]);
        store.restore("slow", removed.clone()).unwrap();
        assert_eq!(store.get("slow").unwrap(), removed);
        assert!(matches!(store.delete("gone"), Err(SnapshotError::NotFound(_))));
    }

    #[test]
    fn test_rename() {
        let mut store = filled_store();
        assert!(matches!(store.rename("init", "slow"), Err(SnapshotError::AlreadyExists(_))));
        let snapshot = store.get("init").unwrap();
        store.rename("init", "start").unwrap();
        assert_eq!(store.names().unwrap(), vec!["slow", "start"]);
        assert_eq!(store.get("start").unwrap(), snapshot);
    }

    #[test]
    fn test_export_import_round_trip() {
        let store = filled_store();
        let doc = store.export_snapshots().unwrap();
        let mut other = SnapshotStore::in_memory();
        assert_eq!(other.import_document(&doc).unwrap(), 2);
        assert_eq!(other.list().unwrap(), store.list().unwrap());
    }

    #[test]
    fn test_import_overwrites() {
        let mut store = filled_store();
        let mut incoming = SnapshotMap::new();
        let mut state = SynthState::default();
        state.bpm = 200.0;
        incoming.insert(String::from("slow"), Snapshot::new(state, "", &[]));
        store.import_snapshots(incoming).unwrap();
        assert_eq!(store.load("slow").unwrap().bpm, 200.0);
    }

    #[test]
    fn test_invalid_document_rejected_wholesale() {
        let mut store = SnapshotStore::in_memory();
        assert!(matches!(store.import_document("[1, 2]"),
            Err(SnapshotError::InvalidDocument(_))));

        let mut bad = SynthState::default();
        bad.patterns.clear();
        let mut incoming = SnapshotMap::new();
        incoming.insert(String::from("good"), Snapshot::new(SynthState::default(), "", &[]));
        incoming.insert(String::from("bad"), Snapshot::new(bad, "", &[]));
        let doc = serde_json::to_string(&incoming).unwrap();

        assert!(matches!(store.import_document(&doc),
            Err(SnapshotError::InvalidSnapshot { .. })));
        assert!(store.names().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_conflicts() {
        let store = filled_store();
        let existing = store.list().unwrap();
        let mut incoming = SnapshotMap::new();
        incoming.insert(String::from("init"), Snapshot::new(SynthState::default(), "new", &[]));
        incoming.insert(String::from("fresh"), Snapshot::new(SynthState::default(), "", &[]));

        assert_eq!(store.conflicts(&incoming).unwrap(), vec!["init"]);

        let skipped = resolve_conflicts(incoming.clone(), &existing, ConflictResolution::Skip);
        assert_eq!(skipped.keys().collect::<Vec<_>>(), ["fresh"]);

        let kept = resolve_conflicts(incoming.clone(), &existing, ConflictResolution::Overwrite);
        assert_eq!(kept.keys().collect::<Vec<_>>(), ["fresh", "init"]);

        let renamed = resolve_conflicts(incoming, &existing, ConflictResolution::Rename);
        assert_eq!(renamed.keys().collect::<Vec<_>>(), ["fresh", "init (2)"]);
        assert_eq!(renamed["init (2)"].description(), "new");
    }

    #[test]
    fn test_local_backend_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.msgpack");
        {
            let mut store = SnapshotStore::local(&path).unwrap();
            store.save("keep", &SynthState::default(), "on disk", &[]).unwrap();
        }
        let store = SnapshotStore::local(&path).unwrap();
        assert_eq!(store.get("keep").unwrap().description(), "on disk");
    }

    #[derive(Clone, Default)]
    struct FakeService {
        entries: Arc<Mutex<Vec<RemoteSnapshot>>>,
        next_id: u64,
        fail: bool,
    }

    impl SnapshotService for FakeService {
        fn create(&mut self, name: &str, snapshot: &Snapshot
        ) -> Result<RemoteSnapshot, SnapshotError> {
            if self.fail {
                return Err(SnapshotError::Remote(String::from("offline")))
            }
            self.next_id += 1;
            let remote = RemoteSnapshot {
                id: self.next_id.to_string(),
                created_at: snapshot.timestamp(),
                name: name.to_owned(),
                snapshot: snapshot.clone(),
            };
            self.entries.lock().unwrap().push(remote.clone());
            Ok(remote)
        }

        fn list(&mut self) -> Result<Vec<RemoteSnapshot>, SnapshotError> {
            Ok(self.entries.lock().unwrap().clone())
        }

        fn delete(&mut self, id: &str) -> Result<(), SnapshotError> {
            self.entries.lock().unwrap().retain(|r| r.id != id);
            Ok(())
        }
    }

    #[test]
    fn test_remote_backend_syncs() {
        let service = FakeService::default();
        let entries = service.entries.clone();
        let mut backend = RemoteBackend::new(service).unwrap();
        let snapshot = Snapshot::new(SynthState::default(), "", &[]);

        backend.put("a", snapshot.clone()).unwrap();
        backend.put("a", snapshot.clone()).unwrap();
        backend.put("b", snapshot).unwrap();
        backend.delete("b").unwrap();
        backend.flush();

        let names: Vec<_> = entries.lock().unwrap().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["a"]);
        assert!(backend.poll_errors().is_empty());
    }

    #[test]
    fn test_remote_errors_reported() {
        let service = FakeService { fail: true, ..Default::default() };
        let mut store = SnapshotStore::for_session(Session::Authenticated(service), "unused")
            .unwrap();
        store.save("x", &SynthState::default(), "", &[]).unwrap();
        // cached even though the service failed
        assert!(store.get("x").is_ok());
        let mut errors = Vec::new();
        for _ in 0..100 {
            errors.extend(store.poll_errors());
            if !errors.is_empty() {
                break
            }
            thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(matches!(errors.as_slice(), [SnapshotError::Remote(_)]));
    }
}
