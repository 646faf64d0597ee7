//! Registry Behaviour Tests
//!
//! Drives a full registry over scratch base directories: route resolution,
//! encode/decode, reload failure handling and version tracking.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use route_schemas::{
    Artifact, Direction, RegistryConfig, RegistryError, RouteAliasTable, SchemaRegistry, WatchState,
};
use serde_json::json;
use tempfile::{tempdir, TempDir};

const LOGIN_PROTO: &str = include_str!("fixtures/login.proto");
const ROUTES: &str = include_str!("fixtures/routes.json");
const SERVER_PROTOS: &str = include_str!("fixtures/serverProtos.json");
const CHAT_PROTO: &str = include_str!("fixtures/protos/chat.proto");
const USER_PROTO: &str = include_str!("fixtures/protos/nested/user.proto");

// =============================================================================
// Helpers
// =============================================================================

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Push a file's modification time an hour into the past
fn age(path: &Path) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(3600)).unwrap();
}

fn config_dir(base: &Path) -> PathBuf {
    base.join("config")
}

/// Base directory with the login schema and aliases on both sides
fn login_base(with_routes: bool) -> TempDir {
    let dir = tempdir().unwrap();
    let config = config_dir(dir.path());
    let mut files = vec![
        config.join("protoFile/serverProto.proto"),
        config.join("protoFile/clientProto.proto"),
    ];
    for proto in &files {
        write(proto, LOGIN_PROTO);
    }
    if with_routes {
        for routes in ["serverRouteRelationship.json", "clientRouteRelationship.json"] {
            write(&config.join(routes), ROUTES);
            files.push(config.join(routes));
        }
    }
    write(&config.join("serverProtos.json"), SERVER_PROTOS);
    files.push(config.join("serverProtos.json"));

    for file in &files {
        age(file);
    }
    dir
}

fn unwatched() -> RegistryConfig {
    let mut config = RegistryConfig::default();
    config.watch.enabled = false;
    config
}

fn started(base: &Path, config: RegistryConfig) -> SchemaRegistry {
    let mut registry = SchemaRegistry::new(base, config);
    registry.start().unwrap();
    registry
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    done()
}

// =============================================================================
// Route Resolution
// =============================================================================

#[test]
fn test_check_follows_aliases() {
    let base = login_base(true);
    let registry = started(base.path(), unwatched());
    let aliases = RouteAliasTable::from_json(Path::new("routes.json"), ROUTES).unwrap();
    let defined = ["pkg", "pkg.LoginRequest", "pkg.LoginResponse"];

    for direction in [Direction::Server, Direction::Client] {
        for route in ["login", "login.reply", "pkg.LoginRequest", "pkg", "nope", "pkg.Missing"] {
            let resolved = aliases.resolve(route);
            let expected = defined.contains(&resolved);
            assert_eq!(
                registry.check(direction, route),
                expected,
                "{} route {} (resolved {})",
                direction,
                route,
                resolved
            );
        }
    }
}

#[test]
fn test_no_alias_file_uses_identity() {
    let base = login_base(false);
    let registry = started(base.path(), unwatched());

    assert!(!registry.check(Direction::Server, "login"));
    assert!(registry.check(Direction::Server, "pkg.LoginRequest"));

    let bytes = registry.encode("pkg.LoginRequest", &json!({"name": "bob"})).unwrap();
    assert_eq!(registry.decode("pkg.LoginRequest", &bytes).unwrap(), json!({"name": "bob"}));
}

#[test]
fn test_unknown_direction_tag() {
    let err = "upstream".parse::<Direction>().unwrap_err();
    assert!(matches!(err, RegistryError::UnknownDirection { .. }));
}

// =============================================================================
// Encode / Decode
// =============================================================================

#[test]
fn test_login_round_trip() {
    let base = login_base(true);
    let registry = started(base.path(), unwatched());

    let bytes = registry.encode("login", &json!({"name": "alice"})).unwrap();
    assert_eq!(registry.decode("login", &bytes).unwrap(), json!({"name": "alice"}));

    let reply = json!({"code": 200, "token": "t-1", "roles": ["admin", "player"]});
    let bytes = registry.encode("login.reply", &reply).unwrap();
    assert_eq!(registry.decode("login.reply", &bytes).unwrap(), reply);
}

#[test]
fn test_missing_required_field_is_verification_error() {
    let base = login_base(true);
    let registry = started(base.path(), unwatched());
    let version = registry.version();
    let snapshot = registry.snapshot();

    let err = registry.encode("login", &json!({})).unwrap_err();
    match &err {
        RegistryError::Verification { type_name, path, reason } => {
            assert_eq!(type_name, "pkg.LoginRequest");
            assert_eq!(path, "name");
            assert_eq!(reason, "missing required field");
        }
        other => panic!("Expected Verification, got {:?}", other),
    }
    assert!(err.is_caller_error());

    assert_eq!(registry.version(), version);
    assert_eq!(registry.snapshot(), snapshot);
    assert!(registry.check(Direction::Server, "login"));
}

#[test]
fn test_unknown_route_is_surfaced() {
    let base = login_base(true);
    let registry = started(base.path(), unwatched());

    let err = registry.encode("logout", &json!({})).unwrap_err();
    assert!(matches!(
        err,
        RegistryError::UnknownRoute { ref route, ref type_name } if route == "logout" && type_name == "logout"
    ));
}

#[test]
fn test_decode_garbage_fails() {
    let base = login_base(true);
    let registry = started(base.path(), unwatched());

    let err = registry.decode("login", &[0xff, 0xff, 0xff]).unwrap_err();
    assert!(matches!(err, RegistryError::Decode(_)));
}

// =============================================================================
// Directory Sources
// =============================================================================

#[test]
fn test_directory_schema_compiles_every_file() {
    let dir = tempdir().unwrap();
    let protos = dir.path().join("protos/server");
    write(&protos.join("chat.proto"), CHAT_PROTO);
    write(&protos.join("nested/user.proto"), USER_PROTO);
    write(&protos.join("README.md"), "not a schema");

    let mut config = unwatched();
    config.paths.server_message_path = PathBuf::from("protos/server");
    let registry = started(dir.path(), config);

    assert!(registry.check(Direction::Server, "chat.Say"));
    assert!(registry.check(Direction::Server, "chat.User"));
    assert_eq!(registry.message_types(Direction::Server), vec!["chat.Say", "chat.User"]);

    let bytes = registry
        .encode("chat.Say", &json!({"from": {"id": 7, "nick": "neo"}, "text": "hi"}))
        .unwrap();
    assert!(!bytes.is_empty());
}

#[test]
fn test_single_schema_file_imports_sibling() {
    let dir = tempdir().unwrap();
    let protos = config_dir(dir.path()).join("protoFile");
    write(
        &protos.join("common.proto"),
        "syntax = \"proto3\";\npackage pkg;\nmessage Point { int32 x = 1; int32 y = 2; }\n",
    );
    write(
        &protos.join("serverProto.proto"),
        "syntax = \"proto3\";\npackage pkg;\nimport \"common.proto\";\nmessage Move { Point to = 1; }\n",
    );

    let registry = started(dir.path(), unwatched());

    assert!(registry.check(Direction::Server, "pkg.Move"));
    assert!(registry.check(Direction::Server, "pkg.Point"));
    let bytes = registry.encode("pkg.Move", &json!({"to": {"x": 3, "y": 4}})).unwrap();
    assert!(!bytes.is_empty());
}

#[test]
fn test_directory_routes_are_merged() {
    let dir = tempdir().unwrap();
    let routes = dir.path().join("routes");
    write(&routes.join("a.json"), r#"{"login": "pkg.LoginRequest"}"#);
    write(&routes.join("more/b.json"), r#"{"reply": "pkg.LoginResponse"}"#);
    write(&config_dir(dir.path()).join("protoFile/serverProto.proto"), LOGIN_PROTO);

    let mut config = unwatched();
    config.paths.server_route_dic = PathBuf::from("routes");
    let registry = started(dir.path(), config);

    assert!(registry.check(Direction::Server, "login"));
    assert!(registry.check(Direction::Server, "reply"));
}

// =============================================================================
// Reloading
// =============================================================================

#[test]
fn test_parse_error_keeps_previous_state() {
    let base = login_base(true);
    let registry = started(base.path(), unwatched());
    let routes = config_dir(base.path()).join("serverRouteRelationship.json");
    let proto = config_dir(base.path()).join("protoFile/serverProto.proto");

    let before = registry.encode("login", &json!({"name": "alice"})).unwrap();
    let version = registry.version();

    fs::write(&routes, "{ not json").unwrap();
    assert!(matches!(
        registry.reload(Artifact::ServerRoutes).unwrap_err(),
        RegistryError::Parse { .. }
    ));

    fs::write(&proto, "message {").unwrap();
    assert!(matches!(
        registry.reload(Artifact::ServerSchema).unwrap_err(),
        RegistryError::Parse { .. }
    ));

    assert!(registry.check(Direction::Server, "login"));
    assert_eq!(registry.encode("login", &json!({"name": "alice"})).unwrap(), before);
    assert!(registry.encode("login", &json!({})).is_err());
    assert_eq!(registry.version(), version);
}

#[test]
fn test_reload_publishes_new_aliases() {
    let base = login_base(true);
    let registry = started(base.path(), unwatched());
    let routes = config_dir(base.path()).join("serverRouteRelationship.json");
    let version = registry.version();

    fs::write(&routes, r#"{"signin": "pkg.LoginRequest"}"#).unwrap();
    registry.reload(Artifact::ServerRoutes).unwrap();

    assert!(registry.check(Direction::Server, "signin"));
    assert!(!registry.check(Direction::Server, "login"));
    assert!(registry.version() > version);
}

#[test]
fn test_version_never_regresses() {
    let base = login_base(true);
    let registry = started(base.path(), unwatched());
    let routes = config_dir(base.path()).join("clientRouteRelationship.json");

    fs::write(&routes, ROUTES).unwrap();
    registry.reload(Artifact::ClientRoutes).unwrap();
    let bumped = registry.version();

    let file = fs::File::options().write(true).open(&routes).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(7200)).unwrap();
    registry.reload(Artifact::ClientRoutes).unwrap();

    assert_eq!(registry.version(), bumped);
}

#[test]
fn test_initial_version_is_newest_mtime() {
    let base = login_base(true);
    let newest = config_dir(base.path()).join("clientProtos.json");
    write(&newest, "{}");
    let expected = fs::metadata(&newest)
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64;

    let registry = started(base.path(), unwatched());
    assert_eq!(registry.version(), expected);
    assert_eq!(registry.snapshot().client, json!({}));
}

#[test]
fn test_watched_change_is_applied() {
    let base = login_base(true);
    let mut config = RegistryConfig::default();
    config.watch.debounce_ms = 20;
    let mut registry = started(base.path(), config);
    let routes = config_dir(base.path()).join("serverRouteRelationship.json");
    let version = registry.version();

    assert_eq!(registry.watched_files(), 5);
    assert_eq!(registry.watch_state(&routes), Some(WatchState::Watching));

    fs::write(&routes, r#"{"signin": "pkg.LoginRequest"}"#).unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        registry.check(Direction::Server, "signin") && registry.version() > version
    }));
    assert!(!registry.check(Direction::Server, "login"));

    registry.stop();
    assert_eq!(registry.watched_files(), 0);
    assert_eq!(registry.watch_state(&routes), None);
}

#[test]
fn test_watched_parse_error_keeps_previous_state() {
    let base = login_base(true);
    let mut config = RegistryConfig::default();
    config.watch.debounce_ms = 20;
    let mut registry = started(base.path(), config);
    let routes = config_dir(base.path()).join("serverRouteRelationship.json");

    let before = registry.encode("login", &json!({"name": "alice"})).unwrap();
    let version = registry.version();

    fs::write(&routes, "{ not json").unwrap();
    thread::sleep(Duration::from_millis(500));

    assert!(registry.check(Direction::Server, "login"));
    assert_eq!(registry.encode("login", &json!({"name": "alice"})).unwrap(), before);
    assert_eq!(registry.version(), version);
    assert_eq!(registry.watch_state(&routes), Some(WatchState::Watching));

    // The loop survives the failure and applies the next good write.
    fs::write(&routes, r#"{"signin": "pkg.LoginRequest"}"#).unwrap();
    assert!(wait_until(Duration::from_secs(10), || {
        registry.check(Direction::Server, "signin")
            && registry.version() > version
            && registry.watch_state(&routes) == Some(WatchState::Watching)
    }));

    registry.stop();
}

// =============================================================================
// Snapshot
// =============================================================================

#[test]
fn test_snapshot_exports_sources() {
    let base = login_base(true);
    let registry = started(base.path(), unwatched().with_public_key("MIIB-key"));

    let snapshot = registry.snapshot();
    let expected: serde_json::Value = serde_json::from_str(SERVER_PROTOS).unwrap();
    assert_eq!(snapshot.server, expected);
    assert_eq!(snapshot.client, serde_json::Value::Null);
    assert_eq!(snapshot.public_key, "MIIB-key");
    assert_eq!(snapshot.version, registry.version());

    let again = registry.snapshot();
    assert_eq!(snapshot.checksum, again.checksum);
}
