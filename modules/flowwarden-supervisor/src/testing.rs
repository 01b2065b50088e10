// Test mocks for the supervisor.
//
// One mock per collaborator boundary:
// - MockConfigManager (ConfigManager) : mutable per-kind configuration
// - MockSourceProvider (SourceProvider) : scripted in-memory sources
// - StaticTransformProvider (TransformContextProvider) : fixed features per kind
// - MemoryCheckpointStore (CheckpointStore) : path-keyed map with fault injection
// - RecordingSleeper (Sleeper) : records waits, never sleeps
// - ScriptedListener (ChangeListener) : sends commands on a timeline
//
// Plus helpers for building Settings and records.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;

use flowwarden_common::{RawRecord, Settings, SourceKind};

use crate::checkpoint::{CheckpointError, CheckpointStore, ContextState};
use crate::config_manager::{ConfigManager, SourceConfig};
use crate::features::{TransformContext, TransformContextProvider};
use crate::listener::{ChangeListener, ControlCommand};
use crate::retry::Sleeper;
use crate::sources::{SourceProvider, StreamSource};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const TEST_TENANT: &str = "acme";

/// Settings with every required variable set and short timings.
pub fn test_settings(checkpoint_dir: &Path) -> Settings {
    let vars = HashMap::from([
        ("CHECKPOINT_DIR", checkpoint_dir.display().to_string()),
        ("FEATURE_SERVICE_URL", "http://features.test".to_string()),
        ("STORAGE_HOSTS", "localhost:5432".to_string()),
        ("BUS_CONNECTION_STRING", "postgres://localhost/bus".to_string()),
        ("BUS_COMMAND_QUEUE", "commands".to_string()),
        ("BUS_CONFIG_QUEUE", "config".to_string()),
        ("PIPELINE_INIT_WAIT_MS", "750".to_string()),
        ("CONTEXT_STOP_WAIT_MS", "2000".to_string()),
        ("BATCH_INTERVAL_SECS", "1".to_string()),
        ("MAX_BATCH_RECORDS", "2".to_string()),
    ]);
    Settings::from_lookup(|k| vars.get(k).cloned())
        .expect("test settings are complete")
}

pub fn record(offset: i64) -> RawRecord {
    RawRecord {
        offset,
        received_at: Utc::now(),
        payload: json!({ "type": "observed", "n": offset }),
    }
}

/// Records with offsets `1..=n`.
pub fn records(n: i64) -> Vec<RawRecord> {
    (1..=n).map(record).collect()
}

// ---------------------------------------------------------------------------
// MockConfigManager
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockConfigManager {
    configs: Mutex<HashMap<SourceKind, SourceConfig>>,
    erroring: Mutex<HashSet<SourceKind>>,
    lookups: AtomicUsize,
}

impl MockConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled configuration for each kind, all under the test tenant.
    pub fn enabled(kinds: &[SourceKind]) -> Self {
        let mgr = Self::new();
        for kind in kinds {
            mgr.insert(SourceConfig::new(*kind, TEST_TENANT));
        }
        mgr
    }

    pub fn insert(&self, config: SourceConfig) {
        self.configs.lock().unwrap().insert(config.kind, config);
    }

    pub fn remove(&self, kind: SourceKind) {
        self.configs.lock().unwrap().remove(&kind);
    }

    /// Make lookups for `kind` fail.
    pub fn error_on(&self, kind: SourceKind) {
        self.erroring.lock().unwrap().insert(kind);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigManager for MockConfigManager {
    async fn source_config(&self, kind: SourceKind) -> Result<Option<SourceConfig>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.erroring.lock().unwrap().contains(&kind) {
            bail!("MockConfigManager: lookup failure for {kind}");
        }
        Ok(self.configs.lock().unwrap().get(&kind).cloned())
    }
}

// ---------------------------------------------------------------------------
// MockSourceProvider / VecSource
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SourceScript {
    records: Vec<RawRecord>,
    fail_when_drained: bool,
}

/// Opens in-memory sources for registered kinds; unregistered kinds are
/// unavailable.
#[derive(Default)]
pub struct MockSourceProvider {
    scripts: Mutex<HashMap<SourceKind, SourceScript>>,
    pull_delay: Option<Duration>,
}

impl MockSourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(self, kind: SourceKind, records: Vec<RawRecord>) -> Self {
        self.scripts.lock().unwrap().insert(
            kind,
            SourceScript {
                records,
                fail_when_drained: false,
            },
        );
        self
    }

    /// Like `with_records`, but the source errors once it has nothing left.
    pub fn failing_when_drained(self, kind: SourceKind, records: Vec<RawRecord>) -> Self {
        self.scripts.lock().unwrap().insert(
            kind,
            SourceScript {
                records,
                fail_when_drained: true,
            },
        );
        self
    }

    /// Every pull on every opened source takes `delay` before returning.
    pub fn with_pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = Some(delay);
        self
    }
}

#[async_trait]
impl SourceProvider for MockSourceProvider {
    async fn open(
        &self,
        kind: SourceKind,
        _config: &SourceConfig,
    ) -> Result<Option<Box<dyn StreamSource>>> {
        let script = self.scripts.lock().unwrap().get(&kind).cloned();
        Ok(script.map(|s| {
            Box::new(VecSource {
                kind,
                records: s.records,
                fail_when_drained: s.fail_when_drained,
                pull_delay: self.pull_delay,
            }) as Box<dyn StreamSource>
        }))
    }
}

pub struct VecSource {
    kind: SourceKind,
    records: Vec<RawRecord>,
    fail_when_drained: bool,
    pull_delay: Option<Duration>,
}

#[async_trait]
impl StreamSource for VecSource {
    async fn pull(&mut self, after: i64, limit: usize) -> Result<Vec<RawRecord>> {
        if let Some(delay) = self.pull_delay {
            tokio::time::sleep(delay).await;
        }
        let batch: Vec<RawRecord> = self
            .records
            .iter()
            .filter(|r| r.offset > after)
            .take(limit)
            .cloned()
            .collect();
        if batch.is_empty() && self.fail_when_drained {
            bail!("VecSource: {} drained after offset {after}", self.kind);
        }
        Ok(batch)
    }
}

// ---------------------------------------------------------------------------
// StaticTransformProvider
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StaticTransformProvider {
    features: HashMap<SourceKind, BTreeMap<String, serde_json::Value>>,
}

impl StaticTransformProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feature(
        mut self,
        kind: SourceKind,
        name: &str,
        value: serde_json::Value,
    ) -> Self {
        self.features
            .entry(kind)
            .or_default()
            .insert(name.to_string(), value);
        self
    }
}

#[async_trait]
impl TransformContextProvider for StaticTransformProvider {
    async fn transform_context(
        &self,
        kind: SourceKind,
        config: &SourceConfig,
    ) -> Result<TransformContext> {
        Ok(TransformContext {
            tenant: config.tenant.clone(),
            features: self.features.get(&kind).cloned().unwrap_or_default(),
            model_path: None,
            blob_url: None,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: Mutex<HashMap<PathBuf, ContextState>>,
    corrupt: Mutex<HashSet<PathBuf>>,
    writes: AtomicUsize,
    failing_writes: AtomicUsize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `recover` of `dir` report corruption.
    pub fn corrupt(&self, dir: &Path) {
        self.corrupt.lock().unwrap().insert(dir.to_path_buf());
    }

    pub fn put(&self, dir: &Path, state: ContextState) {
        self.states.lock().unwrap().insert(dir.to_path_buf(), state);
    }

    pub fn get(&self, dir: &Path) -> Option<ContextState> {
        self.states.lock().unwrap().get(dir).cloned()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Fail the next `n` checkpoint writes.
    pub fn fail_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn recover(&self, dir: &Path) -> Result<Option<ContextState>, CheckpointError> {
        if self.corrupt.lock().unwrap().contains(dir) {
            return Err(CheckpointError::corrupt(dir, "injected corruption"));
        }
        Ok(self.get(dir))
    }

    async fn checkpoint(&self, dir: &Path, state: &ContextState) -> Result<(), CheckpointError> {
        let should_fail = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(CheckpointError::Io {
                path: dir.to_path_buf(),
                source: std::io::Error::other("injected write failure"),
            });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.put(dir, state.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingSleeper
// ---------------------------------------------------------------------------

type SleepHook = Box<dyn Fn(usize) + Send + Sync>;

/// Records every requested wait and returns immediately. An optional hook
/// runs after each wait with the 1-based wait count, so tests can change the
/// world between attachment attempts.
#[derive(Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
    hook: Option<SleepHook>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_sleep(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        let count = {
            let mut waits = self.waits.lock().unwrap();
            waits.push(duration);
            waits.len()
        };
        if let Some(hook) = &self.hook {
            hook(count);
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedListener
// ---------------------------------------------------------------------------

/// Sends each command after its delay (relative to the previous one). After
/// the script it either idles forever or closes the channel.
pub struct ScriptedListener {
    script: Vec<(Duration, ControlCommand)>,
    close_after: bool,
}

impl ScriptedListener {
    pub fn new(script: Vec<(Duration, ControlCommand)>) -> Self {
        Self {
            script,
            close_after: false,
        }
    }

    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    /// Close the channel once the script is done.
    pub fn then_close(mut self) -> Self {
        self.close_after = true;
        self
    }
}

#[async_trait]
impl ChangeListener for ScriptedListener {
    async fn listen(&self, commands: mpsc::Sender<ControlCommand>) -> Result<()> {
        for (delay, cmd) in &self.script {
            tokio::time::sleep(*delay).await;
            if commands.send(cmd.clone()).await.is_err() {
                return Ok(());
            }
        }
        if !self.close_after {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
