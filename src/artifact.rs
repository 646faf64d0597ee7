//! Registry artifacts
//!
//! The registry tracks six artifacts: a route table, a compiled schema and a
//! raw JSON mirror of the schema for each direction. Each artifact is backed
//! by either a single file or a directory of files.
//!
//! Discovery and reading touch the filesystem; [`parse_artifact`] does not.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::alias::RouteAliasTable;
use crate::error::{RegistryError, Result};
use crate::registry::Direction;
use crate::schema::{ProtoSchema, SchemaFile};
use crate::version::SchemaVersion;

/// How an artifact's files are parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// JSON route alias table
    Routes,
    /// Raw JSON mirror of a schema, shipped to peers in snapshots
    Source,
    /// `.proto` schema compiled into a [`ProtoSchema`]
    Schema,
}

impl ArtifactKind {
    /// File extension taken when the artifact is a directory
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Routes | ArtifactKind::Source => "json",
            ArtifactKind::Schema => "proto",
        }
    }
}

/// One of the six tracked artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {
    ServerSource,
    ClientSource,
    ServerRoutes,
    ClientRoutes,
    ServerSchema,
    ClientSchema,
}

impl Artifact {
    /// Load order used at startup
    pub const ALL: [Artifact; 6] = [
        Artifact::ServerSource,
        Artifact::ClientSource,
        Artifact::ServerRoutes,
        Artifact::ClientRoutes,
        Artifact::ServerSchema,
        Artifact::ClientSchema,
    ];

    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::ServerSource | Artifact::ClientSource => ArtifactKind::Source,
            Artifact::ServerRoutes | Artifact::ClientRoutes => ArtifactKind::Routes,
            Artifact::ServerSchema | Artifact::ClientSchema => ArtifactKind::Schema,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Artifact::ServerSource | Artifact::ServerRoutes | Artifact::ServerSchema => Direction::Server,
            Artifact::ClientSource | Artifact::ClientRoutes | Artifact::ClientSchema => Direction::Client,
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Artifact::ServerSource => "server-source",
            Artifact::ClientSource => "client-source",
            Artifact::ServerRoutes => "server-routes",
            Artifact::ClientRoutes => "client-routes",
            Artifact::ServerSchema => "server-schema",
            Artifact::ClientSchema => "client-schema",
        };
        f.write_str(name)
    }
}

/// Files backing an artifact, discovered once at load time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub root: PathBuf,
    pub is_dir: bool,
    pub files: Vec<PathBuf>,
}

impl ArtifactLayout {
    /// Discover the files behind `root`.
    ///
    /// Returns `None` when the path does not exist. Directories are walked
    /// fully recursively without following symlinks; dotfiles and files
    /// without the kind's extension are skipped. Files are sorted by path.
    pub fn discover(root: &Path, kind: ArtifactKind) -> Result<Option<Self>> {
        let metadata = match fs::metadata(root) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_file() {
            return Ok(Some(Self {
                root: root.to_path_buf(),
                is_dir: false,
                files: vec![root.to_path_buf()],
            }));
        }

        if !metadata.is_dir() {
            debug!(path = %root.display(), "artifact path is neither file nor directory, skipping");
            return Ok(None);
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));
        for entry in walker {
            let entry = entry.map_err(|e| RegistryError::parse(root, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let matches_kind = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == kind.extension());
            if matches_kind {
                files.push(entry.into_path());
            } else {
                debug!(path = %entry.path().display(), "skipping file with foreign extension");
            }
        }
        files.sort();

        Ok(Some(Self {
            root: root.to_path_buf(),
            is_dir: true,
            files,
        }))
    }

    /// Name of a file relative to the artifact root, with `/` separators
    pub fn relative_name(&self, file: &Path) -> String {
        let relative = if self.is_dir {
            file.strip_prefix(&self.root).unwrap_or(file)
        } else {
            Path::new(file.file_name().unwrap_or(file.as_os_str()))
        };
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Read every file and the newest modification time among them
    pub fn read(&self) -> Result<(Vec<ArtifactFile>, SchemaVersion)> {
        let mut files = Vec::with_capacity(self.files.len());
        let mut newest = SchemaVersion::ZERO;

        for path in &self.files {
            let contents = fs::read_to_string(path)?;
            let modified = fs::metadata(path)?.modified()?;
            newest = newest.max(SchemaVersion::from_system_time(modified));
            files.push(ArtifactFile {
                name: self.relative_name(path),
                path: path.clone(),
                contents,
            });
        }

        Ok((files, newest))
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

/// Contents of one artifact file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub name: String,
    pub path: PathBuf,
    pub contents: String,
}

/// A parsed artifact, ready to publish
#[derive(Debug, Clone)]
pub enum ParsedArtifact {
    Routes(RouteAliasTable),
    Source(serde_json::Value),
    Schema(ProtoSchema),
}

/// Parse artifact contents according to their kind.
///
/// Several route tables or source mirrors (from a directory) are merged as
/// JSON objects in order, later files winning. Several schema files are
/// compiled together; a single schema file resolves imports it does not
/// carry from its own directory.
pub fn parse_artifact(kind: ArtifactKind, origin: &Path, files: &[ArtifactFile]) -> Result<ParsedArtifact> {
    match kind {
        ArtifactKind::Routes => {
            let mut table = RouteAliasTable::new();
            for file in files {
                table.extend(RouteAliasTable::from_json(&file.path, &file.contents)?);
            }
            Ok(ParsedArtifact::Routes(table))
        }
        ArtifactKind::Source => {
            if let [single] = files {
                let value = serde_json::from_str(&single.contents)
                    .map_err(|e| RegistryError::parse(&single.path, e))?;
                return Ok(ParsedArtifact::Source(value));
            }

            let mut merged = serde_json::Map::new();
            for file in files {
                let value: serde_json::Value = serde_json::from_str(&file.contents)
                    .map_err(|e| RegistryError::parse(&file.path, e))?;
                match value {
                    serde_json::Value::Object(object) => merged.extend(object),
                    _ => {
                        return Err(RegistryError::parse(
                            &file.path,
                            "schema mirror in a directory must be a JSON object",
                        ))
                    }
                }
            }
            Ok(ParsedArtifact::Source(serde_json::Value::Object(merged)))
        }
        ArtifactKind::Schema => {
            let sources: Vec<SchemaFile> = files
                .iter()
                .map(|f| SchemaFile::new(f.name.clone(), f.contents.clone()))
                .collect();
            // A lone schema file may import its siblings on disk.
            let include = match files {
                [single] if single.path.as_path() == origin => origin.parent().filter(|p| !p.as_os_str().is_empty()),
                _ => None,
            };
            let schema = match include {
                Some(dir) => ProtoSchema::compile_with_include(origin, &sources, dir)?,
                None => ProtoSchema::compile(origin, &sources)?,
            };
            Ok(ParsedArtifact::Schema(schema))
        }
    }
}
