//! Durable key-value storage and the persisted quota counter.
//!
//! Each key is stored as its own JSON file beneath a root directory so that
//! several running views can share the same store and observe each other's
//! writes through filesystem notifications.

use std::{
    ffi::OsStr,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Directory under the platform data dir used for the store.
pub const DEFAULT_STORE_DIR: &str = "tarot";

/// Current on-disk layout version of a counter value.
pub const ENCODING_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoredCounter {
    version: u32,
    value: i64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Versioned(StoredCounter),
    Legacy(i64),
}

/// Encode a counter value in the versioned layout.
pub fn encode_counter(value: i64) -> Result<Vec<u8>> {
    let payload = StoredCounter {
        version: ENCODING_VERSION,
        value,
    };
    serde_json::to_vec(&payload).context("failed to serialize counter")
}

/// Decode a counter value, accepting the versioned layout or a bare integer.
pub fn decode_counter(bytes: &[u8]) -> Result<i64> {
    let value = match serde_json::from_slice::<StoredValue>(bytes)
        .context("counter is not a JSON integer or versioned record")?
    {
        StoredValue::Versioned(StoredCounter { version, value }) => {
            if version != ENCODING_VERSION {
                bail!("unsupported counter version {version}");
            }
            value
        }
        StoredValue::Legacy(value) => value,
    };
    if value < 0 {
        bail!("negative counter value {value}");
    }
    Ok(value)
}

/// Directory-backed key-value store holding integer counters.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at the provided directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default location under the user's data directory.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_STORE_DIR)
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(key)))
    }

    /// Read `key`, returning `None` when it has never been written.
    pub fn try_read(&self, key: &str) -> Result<Option<i64>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let value =
            decode_counter(&bytes).with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(value))
    }

    /// Replace the value of `key` atomically.
    pub fn try_write(&self, key: &str, value: i64) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        let path = self.path_for(key);
        let bytes = encode_counter(value)?;
        let mut temp = NamedTempFile::new_in(&self.root)
            .with_context(|| format!("failed to stage write in {}", self.root.display()))?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&path)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Read `key`, falling back to `default` when absent, corrupt or unreadable.
    pub fn read(&self, key: &str, default: i64) -> i64 {
        match self.try_read(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(err) => {
                warn!(key, ?err, "storage read failed; using default");
                default
            }
        }
    }

    /// Best-effort write. Failures are logged and swallowed.
    pub fn write(&self, key: &str, value: i64) {
        if let Err(err) = self.try_write(key, value) {
            warn!(key, value, ?err, "storage write failed; keeping in-memory value");
        }
    }
}

/// Notification emitted when another view changed a watched counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterEvent {
    /// The stored value now differs from what this view last held.
    Changed {
        /// Key that changed.
        key: String,
        /// Value now stored.
        value: i64,
    },
}

/// A single integer persisted under a fixed key, mirrored in memory.
///
/// The mirror is the source of truth for the running process; storage is
/// written best-effort after every update.
pub struct PersistedCounter {
    store: FileStore,
    key: String,
    default: i64,
    value: Arc<RwLock<i64>>,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for PersistedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedCounter")
            .field("root", &self.store.root)
            .field("key", &self.key)
            .field("value", &*self.value.read())
            .field("watching", &self.watcher.is_some())
            .finish()
    }
}

impl PersistedCounter {
    /// Load `key` from `store`, using `default` when nothing usable is stored.
    pub fn open(store: FileStore, key: impl Into<String>, default: i64) -> Self {
        let key = key.into();
        let value = store.read(&key, default);
        debug!(key = %key, value, "counter loaded");
        Self {
            store,
            key,
            default,
            value: Arc::new(RwLock::new(value)),
            watcher: None,
        }
    }

    /// Key this counter is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value used when storage holds nothing usable.
    pub fn default_value(&self) -> i64 {
        self.default
    }

    /// Current in-memory value.
    pub fn get(&self) -> i64 {
        *self.value.read()
    }

    /// Replace the value and persist it. Negative values are clamped to zero.
    pub fn set(&self, value: i64) {
        let value = value.max(0);
        let mut guard = self.value.write();
        *guard = value;
        self.store.write(&self.key, value);
    }

    /// Apply `f` to the current value and persist the result.
    pub fn update(&self, f: impl FnOnce(i64) -> i64) -> i64 {
        let mut guard = self.value.write();
        let value = f(*guard).max(0);
        *guard = value;
        self.store.write(&self.key, value);
        value
    }

    /// Re-read the stored value, replacing the mirror when storage holds one.
    pub fn refresh(&self) -> i64 {
        let mut guard = self.value.write();
        match self.store.try_read(&self.key) {
            Ok(Some(value)) => *guard = value,
            Ok(None) => {}
            Err(err) => warn!(key = %self.key, ?err, "storage refresh failed"),
        }
        *guard
    }

    /// True while a storage watcher is active.
    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Follow writes made to this key by other views of the same store.
    ///
    /// Every external change replaces the mirror and is reported on the
    /// returned channel. Removals and writes to other keys are ignored.
    pub fn watch(&mut self) -> Result<mpsc::UnboundedReceiver<CounterEvent>> {
        let root = self.store.root.clone();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create {}", root.display()))?;

        let target = self
            .store
            .path_for(&self.key)
            .file_name()
            .map(|name| name.to_os_string())
            .context("counter path has no file name")?;
        let store = self.store.clone();
        let key = self.key.clone();
        let value = Arc::clone(&self.value);
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    warn!(?err, "storage watcher error");
                    return;
                }
            };
            if !touches_file(&event, &target) {
                return;
            }

            let mut guard = value.write();
            match store.try_read(&key) {
                Ok(Some(stored)) if stored != *guard => {
                    *guard = stored;
                    drop(guard);
                    info!(key = %key, value = stored, "counter changed externally");
                    let _ = sender.send(CounterEvent::Changed {
                        key: key.clone(),
                        value: stored,
                    });
                }
                Ok(_) => {}
                Err(err) => debug!(key = %key, ?err, "ignoring unreadable external write"),
            }
        })
        .context("failed to create storage watcher")?;

        watcher
            .watch(&root, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;
        self.watcher = Some(watcher);
        Ok(receiver)
    }
}

/// True when `event` may have changed the contents of the file named `target`.
fn touches_file(event: &Event, target: &OsStr) -> bool {
    if matches!(event.kind, EventKind::Remove(_) | EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(target))
}

fn sanitize_key(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            result.push(ch);
        }
    }
    if result.is_empty() {
        "value".to_string()
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use tempfile::tempdir;

    const KEY: &str = "tarot_remaining_draws";

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        condition()
    }

    #[test]
    fn value_survives_restart() -> Result<()> {
        let dir = tempdir()?;
        for value in [0, 1, 2, 3, 998, 999] {
            let counter = PersistedCounter::open(FileStore::new(dir.path()), KEY, 3);
            counter.set(value);
            drop(counter);

            let reopened = PersistedCounter::open(FileStore::new(dir.path()), KEY, 3);
            assert_eq!(reopened.get(), value);
        }
        Ok(())
    }

    #[test]
    fn missing_key_uses_default() -> Result<()> {
        let dir = tempdir()?;
        let counter = PersistedCounter::open(FileStore::new(dir.path()), KEY, 3);
        assert_eq!(counter.get(), 3);
        assert!(!FileStore::new(dir.path()).path_for(KEY).exists());
        Ok(())
    }

    #[test]
    fn corrupt_values_use_default() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::new(dir.path());
        for content in [
            "not json",
            "\"three\"",
            "-2",
            r#"{"version":9,"value":1}"#,
            r#"{"value":1}"#,
        ] {
            fs::write(store.path_for(KEY), content)?;
            assert_eq!(store.read(KEY, 3), 3, "content {content:?}");
        }
        Ok(())
    }

    #[test]
    fn legacy_bare_integer_is_accepted() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::new(dir.path());
        fs::write(store.path_for(KEY), "2")?;
        assert_eq!(store.read(KEY, 3), 2);

        store.write(KEY, 1);
        let raw = fs::read_to_string(store.path_for(KEY))?;
        assert_eq!(raw, r#"{"version":1,"value":1}"#);
        Ok(())
    }

    #[test]
    fn unavailable_storage_keeps_memory_value() -> Result<()> {
        let dir = tempdir()?;
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "file, not a directory")?;

        let counter = PersistedCounter::open(FileStore::new(&blocker), KEY, 3);
        assert_eq!(counter.get(), 3);
        counter.set(2);
        assert_eq!(counter.get(), 2);
        assert_eq!(counter.refresh(), 2);
        Ok(())
    }

    #[test]
    fn negative_values_clamp_to_zero() -> Result<()> {
        let dir = tempdir()?;
        let counter = PersistedCounter::open(FileStore::new(dir.path()), KEY, 0);
        assert_eq!(counter.update(|value| value - 1), 0);
        counter.set(-5);
        assert_eq!(counter.get(), 0);
        Ok(())
    }

    #[test]
    fn refresh_picks_up_foreign_write() -> Result<()> {
        let dir = tempdir()?;
        let counter = PersistedCounter::open(FileStore::new(dir.path()), KEY, 3);
        FileStore::new(dir.path()).write(KEY, 999);
        assert_eq!(counter.get(), 3);
        assert_eq!(counter.refresh(), 999);
        Ok(())
    }

    #[test]
    fn sanitize_keeps_safe_file_names() {
        assert_eq!(sanitize_key("tarot remaining/draws!"), "tarotremainingdraws");
        assert_eq!(sanitize_key("///"), "value");
    }

    #[test]
    fn watcher_filters_events_by_file() {
        use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};

        let root = PathBuf::from("/store");
        let own = root.join(format!("{KEY}.json"));
        let target = OsStr::new("tarot_remaining_draws.json");
        let modify = || EventKind::Modify(ModifyKind::Data(DataChange::Content));

        assert!(touches_file(&Event::new(modify()).add_path(own.clone()), target));
        assert!(touches_file(
            &Event::new(EventKind::Create(CreateKind::File)).add_path(own.clone()),
            target
        ));
        assert!(touches_file(
            &Event::new(modify())
                .add_path(root.join(".tmpA1b2"))
                .add_path(own.clone()),
            target
        ));

        assert!(!touches_file(
            &Event::new(modify()).add_path(root.join("other_key.json")),
            target
        ));
        assert!(!touches_file(
            &Event::new(EventKind::Create(CreateKind::File)).add_path(root.join(".tmpA1b2")),
            target
        ));
        assert!(!touches_file(
            &Event::new(EventKind::Remove(RemoveKind::File)).add_path(own.clone()),
            target
        ));
        assert!(!touches_file(
            &Event::new(EventKind::Access(AccessKind::Read)).add_path(own),
            target
        ));
    }

    #[test]
    fn watcher_follows_writes_for_its_key_only() -> Result<()> {
        let dir = tempdir()?;
        let writer = PersistedCounter::open(FileStore::new(dir.path()), KEY, 3);
        let other = PersistedCounter::open(FileStore::new(dir.path()), "other_key", 0);
        let mut reader = PersistedCounter::open(FileStore::new(dir.path()), KEY, 3);
        let mut events = reader.watch()?;
        assert!(reader.is_watching());

        writer.set(1);
        assert!(wait_for(|| reader.get() == 1), "reader never saw the write");

        let mut seen = Vec::new();
        assert!(wait_for(|| {
            while let Ok(event) = events.try_recv() {
                seen.push(event);
            }
            !seen.is_empty()
        }));
        assert_eq!(
            seen,
            vec![CounterEvent::Changed {
                key: KEY.to_string(),
                value: 1
            }]
        );

        other.set(42);
        thread::sleep(Duration::from_millis(300));
        assert!(events.try_recv().is_err(), "write to another key was reported");
        assert_eq!(reader.get(), 1);

        writer.set(2);
        assert!(wait_for(|| reader.get() == 2), "reader missed the second write");
        Ok(())
    }
}
