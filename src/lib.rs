//! Route Schema Registry
//!
//! A live-reloading protobuf schema registry that resolves short route names
//! to message types and encodes/decodes messages by route.
//!
//! ## Features
//!
//! - **Route Aliases**: JSON tables map routes like `login` to fully-qualified
//!   types like `pkg.LoginRequest`; unmapped routes are used literally
//! - **Hot Reload**: every artifact file is watched and re-published on change
//!   without restarting the host
//! - **Atomic Swaps**: readers always see a complete alias table or schema,
//!   never a partially applied reload
//! - **Monotonic Versions**: the version is the newest file modification time
//!   seen and never goes back
//! - **Snapshots**: raw schema mirrors, public key and version can be shipped
//!   to peers that compile the schema themselves
//!
//! ## Layout
//!
//! ```text
//! <base>/config/
//! ├── serverProtos.json                # server schema mirror (snapshot)
//! ├── clientProtos.json                # client schema mirror (snapshot)
//! ├── serverRouteRelationship.json     # aliases used by encode
//! ├── clientRouteRelationship.json     # aliases used by decode
//! └── protoFile/
//!     ├── serverProto.proto            # file or directory
//!     └── clientProto.proto
//! ```

pub mod alias;
pub mod artifact;
pub mod checksum;
pub mod config;
pub mod error;
pub mod host;
pub mod registry;
pub mod schema;
pub mod version;
pub mod watch;

pub use alias::RouteAliasTable;
pub use artifact::{parse_artifact, Artifact, ArtifactKind, ArtifactLayout, ParsedArtifact};
pub use checksum::Checksum;
pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use host::Host;
pub use registry::{Direction, SchemaRegistry, Snapshot, COMPONENT_NAME};
pub use schema::{ProtoSchema, SchemaFile};
pub use version::SchemaVersion;
pub use watch::{WatchState, WatchedSource};
