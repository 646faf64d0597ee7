//! Schema Registry
//!
//! Publishes route tables, compiled schemas and raw schema mirrors for both
//! directions, and keeps them fresh from disk.
//!
//! Every published value sits behind its own `ArcSwap`, so readers never
//! block and never see a half-applied reload. A single background thread
//! applies file changes; the version only moves forward.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::alias::RouteAliasTable;
use crate::artifact::{parse_artifact, Artifact, ArtifactLayout, ParsedArtifact};
use crate::checksum::Checksum;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::host::Host;
use crate::schema::ProtoSchema;
use crate::version::{SchemaVersion, VersionClock};
use crate::watch::{self, Subscription, WatchSet, WatchSignal, WatchState, WatchedSource};

/// Name under which hosts register this component
pub const COMPONENT_NAME: &str = "__decodeIO__protobuf__";

/// Which side of the exchange a schema describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Messages this side sends; used by [`SchemaRegistry::encode`]
    Server,
    /// Messages this side receives; used by [`SchemaRegistry::decode`]
    Client,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Server => "server",
            Direction::Client => "client",
        }
    }
}

impl FromStr for Direction {
    type Err = RegistryError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "server" => Ok(Direction::Server),
            "client" => Ok(Direction::Client),
            _ => Err(RegistryError::UnknownDirection { tag: tag.to_string() }),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time export for a remote peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub server: Value,
    #[serde(default)]
    pub client: Value,
    pub public_key: String,
    pub version: u64,
    pub checksum: Checksum,
}

#[derive(Default)]
struct DirectionState {
    routes: ArcSwap<RouteAliasTable>,
    schema: ArcSwapOption<ProtoSchema>,
    source: ArcSwap<Value>,
}

impl DirectionState {
    fn clear(&self) {
        self.routes.store(Arc::new(RouteAliasTable::new()));
        self.schema.store(None);
        self.source.store(Arc::new(Value::Null));
    }
}

/// State shared between callers and the reload thread
#[derive(Default)]
struct Shared {
    server: DirectionState,
    client: DirectionState,
    version: VersionClock,
    layouts: Mutex<HashMap<Artifact, ArtifactLayout>>,
    watches: Mutex<WatchSet>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn side(&self, direction: Direction) -> &DirectionState {
        match direction {
            Direction::Server => &self.server,
            Direction::Client => &self.client,
        }
    }

    fn publish(&self, artifact: Artifact, parsed: ParsedArtifact) {
        let side = self.side(artifact.direction());
        match parsed {
            ParsedArtifact::Routes(table) => side.routes.store(Arc::new(table)),
            ParsedArtifact::Source(value) => side.source.store(Arc::new(value)),
            ParsedArtifact::Schema(schema) => side.schema.store(Some(Arc::new(schema))),
        }
    }

    /// Read, parse and publish one artifact from a known layout.
    ///
    /// Nothing is published unless every file reads and parses.
    fn apply(&self, artifact: Artifact, layout: &ArtifactLayout) -> Result<SchemaVersion> {
        let (files, newest) = layout.read()?;
        let parsed = parse_artifact(artifact.kind(), &layout.root, &files)?;
        self.publish(artifact, parsed);
        if self.version.observe(newest) {
            debug!(artifact = %artifact, version = %newest, "version advanced");
        }
        Ok(self.version.current())
    }

    fn reload(&self, artifact: Artifact, path: &Path) -> Result<SchemaVersion> {
        let known = lock(&self.layouts).get(&artifact).cloned();
        let layout = match known {
            Some(layout) => layout,
            None => match ArtifactLayout::discover(path, artifact.kind())? {
                Some(layout) => {
                    lock(&self.layouts).insert(artifact, layout.clone());
                    layout
                }
                None => {
                    debug!(artifact = %artifact, path = %path.display(), "artifact still missing");
                    return Ok(self.version.current());
                }
            },
        };
        self.apply(artifact, &layout)
    }

    fn clear(&self) {
        self.server.clear();
        self.client.clear();
        self.version.reset();
        lock(&self.layouts).clear();
    }
}

struct Reloader {
    tx: Sender<WatchSignal>,
    handle: JoinHandle<()>,
}

/// Live-reloading route schema registry
pub struct SchemaRegistry {
    base: PathBuf,
    config: RegistryConfig,
    shared: Arc<Shared>,
    reloader: Option<Reloader>,
}

impl SchemaRegistry {
    /// Create a registry whose paths resolve against the host's base directory
    pub fn new<H: Host + ?Sized>(host: &H, config: RegistryConfig) -> Self {
        Self {
            base: host.base().to_path_buf(),
            config,
            shared: Arc::new(Shared::default()),
            reloader: None,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Absolute location of an artifact
    pub fn artifact_path(&self, artifact: Artifact) -> PathBuf {
        self.config.paths.resolve(&self.base, artifact)
    }

    /// Load every artifact, then start watching them.
    ///
    /// Missing artifacts are skipped and artifacts that fail to parse are
    /// left empty; both are logged. Only failing to install a watch or to
    /// spawn the reload thread is an error, and leaves nothing watched.
    /// Starting again drops the previous state and watches.
    pub fn start(&mut self) -> Result<()> {
        self.shutdown_reloader();
        lock(&self.shared.watches).close_all();
        self.shared.clear();

        let channel = self.config.watch.enabled.then(watch::subscribe);

        if let Err(e) = self.load_all(channel.as_ref().map(|(tx, _)| tx)) {
            lock(&self.shared.watches).close_all();
            return Err(e);
        }

        if let Some((tx, subscription)) = channel {
            let shared = Arc::clone(&self.shared);
            let paths: HashMap<Artifact, PathBuf> = Artifact::ALL
                .into_iter()
                .map(|a| (a, self.artifact_path(a)))
                .collect();
            let quiet = self.config.watch.debounce();
            let spawned = std::thread::Builder::new()
                .name("schema-reload".to_string())
                .spawn(move || run_reload_loop(&shared, &subscription, &paths, quiet));
            match spawned {
                Ok(handle) => self.reloader = Some(Reloader { tx, handle }),
                Err(e) => {
                    lock(&self.shared.watches).close_all();
                    return Err(e.into());
                }
            }
        }

        info!(
            component = COMPONENT_NAME,
            version = %self.shared.version.current(),
            watched = lock(&self.shared.watches).len(),
            "schema registry started"
        );
        Ok(())
    }

    /// Load each artifact and, when `tx` is given, watch its files
    fn load_all(&self, tx: Option<&Sender<WatchSignal>>) -> Result<()> {
        for artifact in Artifact::ALL {
            let path = self.artifact_path(artifact);
            let layout = match ArtifactLayout::discover(&path, artifact.kind()) {
                Ok(Some(layout)) => layout,
                Ok(None) => {
                    debug!(artifact = %artifact, path = %path.display(), "artifact not present, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(artifact = %artifact, path = %path.display(), error = %e, "failed to scan artifact");
                    continue;
                }
            };
            lock(&self.shared.layouts).insert(artifact, layout.clone());

            if let Err(e) = self.shared.apply(artifact, &layout) {
                warn!(artifact = %artifact, path = %path.display(), error = %e, "failed to load artifact");
                continue;
            }
            info!(artifact = %artifact, path = %path.display(), files = layout.files.len(), "loaded artifact");

            if let Some(tx) = tx {
                let mut watches = lock(&self.shared.watches);
                for file in &layout.files {
                    let mut source = WatchedSource::new(file.clone(), artifact);
                    source.watch(tx.clone())?;
                    watches.install(source);
                }
            }
        }
        Ok(())
    }

    /// Whether `route` resolves to a type known to the direction's schema
    pub fn check(&self, direction: Direction, route: &str) -> bool {
        let side = self.shared.side(direction);
        let routes = side.routes.load();
        let type_name = routes.resolve(route);
        side.schema
            .load_full()
            .is_some_and(|schema| schema.has(type_name))
    }

    /// Encode an outgoing message with the server schema
    pub fn encode(&self, route: &str, message: &Value) -> Result<Vec<u8>> {
        let side = &self.shared.server;
        let schema = side
            .schema
            .load_full()
            .ok_or(RegistryError::SchemaNotLoaded(Direction::Server.as_str()))?;
        let routes = side.routes.load();
        schema.encode(route, routes.resolve(route), message)
    }

    /// Decode an incoming message with the client schema
    pub fn decode(&self, route: &str, bytes: &[u8]) -> Result<Value> {
        let side = &self.shared.client;
        let schema = side
            .schema
            .load_full()
            .ok_or(RegistryError::SchemaNotLoaded(Direction::Client.as_str()))?;
        let routes = side.routes.load();
        schema.decode(route, routes.resolve(route), bytes)
    }

    /// Current version in milliseconds since the Unix epoch
    pub fn version(&self) -> u64 {
        self.shared.version.current().as_millis()
    }

    pub fn schema_version(&self) -> SchemaVersion {
        self.shared.version.current()
    }

    /// Export the raw schema mirrors for a peer
    pub fn snapshot(&self) -> Snapshot {
        let server = self.shared.server.source.load_full();
        let client = self.shared.client.source.load_full();
        Snapshot {
            checksum: Checksum::from_json_parts(&[&*server, &*client]),
            server: Value::clone(&server),
            client: Value::clone(&client),
            public_key: self.config.registry.public_key.clone(),
            version: self.version(),
        }
    }

    /// Message types known to a direction's schema
    pub fn message_types(&self, direction: Direction) -> Vec<String> {
        self.shared
            .side(direction)
            .schema
            .load_full()
            .map(|schema| schema.message_names())
            .unwrap_or_default()
    }

    /// Re-read one artifact now and publish it.
    ///
    /// On failure the previously published value stays in place.
    pub fn reload(&self, artifact: Artifact) -> Result<()> {
        self.shared.reload(artifact, &self.artifact_path(artifact))?;
        Ok(())
    }

    /// Number of files currently watched
    pub fn watched_files(&self) -> usize {
        lock(&self.shared.watches).len()
    }

    pub fn watch_state(&self, path: &Path) -> Option<WatchState> {
        lock(&self.shared.watches).state(path)
    }

    /// Close every watch, stop the reload thread and drop published state.
    ///
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        lock(&self.shared.watches).close_all();
        let was_running = self.shutdown_reloader();
        self.shared.clear();
        if was_running {
            info!("schema registry stopped");
        }
    }

    fn shutdown_reloader(&mut self) -> bool {
        let Some(reloader) = self.reloader.take() else {
            return false;
        };
        // The thread may already be gone if every watcher was dropped.
        let _ = reloader.tx.send(WatchSignal::Shutdown);
        if reloader.handle.join().is_err() {
            warn!("schema reload thread panicked");
        }
        true
    }
}

impl Drop for SchemaRegistry {
    fn drop(&mut self) {
        lock(&self.shared.watches).close_all();
        self.shutdown_reloader();
    }
}

fn run_reload_loop(
    shared: &Shared,
    subscription: &Subscription,
    paths: &HashMap<Artifact, PathBuf>,
    quiet: Duration,
) {
    while let Some(batch) = subscription.next_batch(quiet) {
        let mut artifacts: Vec<Artifact> = Vec::new();
        {
            let mut watches = lock(&shared.watches);
            for change in &batch {
                watches.set_state(&change.path, WatchState::ChangeDetected);
                if !artifacts.contains(&change.artifact) {
                    artifacts.push(change.artifact);
                }
            }
        }

        for artifact in artifacts {
            lock(&shared.watches).set_artifact_state(artifact, WatchState::Reloading);
            let Some(path) = paths.get(&artifact) else {
                continue;
            };
            match shared.reload(artifact, path) {
                Ok(version) => info!(artifact = %artifact, version = %version, "reloaded artifact"),
                Err(e) => warn!(
                    artifact = %artifact,
                    error = %e,
                    "failed to reload artifact, keeping previous version"
                ),
            }
            lock(&shared.watches).set_artifact_state(artifact, WatchState::Watching);
        }
    }
    debug!("schema reload loop finished");
}
