//! Compiled protobuf schemas
//!
//! [`ProtoSchema`] wraps a descriptor pool built by `protox` from in-memory
//! `.proto` sources. It answers type lookups and converts between JSON
//! values and wire bytes with `prost-reflect` dynamic messages.

mod verify;

use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, Kind, MessageDescriptor, SerializeOptions};
use protox::file::{ChainFileResolver, File, FileResolver, GoogleFileResolver, IncludeFileResolver};
use protox::Compiler;
use serde_json::Value;

use crate::error::{RegistryError, Result};

pub use verify::verify_message;
use verify::is_byte_array;

/// One `.proto` source, named by its path relative to the source root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaFile {
    pub name: String,
    pub contents: String,
}

impl SchemaFile {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

/// Serves schema sources from memory so compilation never touches the disk
struct SourceResolver {
    files: HashMap<String, String>,
}

impl FileResolver for SourceResolver {
    fn resolve_path(&self, path: &Path) -> Option<String> {
        path.to_str()
            .filter(|name| self.files.contains_key(*name))
            .map(str::to_owned)
    }

    fn open_file(&self, name: &str) -> std::result::Result<File, protox::Error> {
        match self.files.get(name) {
            Some(source) => File::from_source(name, source),
            None => Err(protox::Error::file_not_found(name)),
        }
    }
}

/// An immutable compiled schema
#[derive(Debug, Clone)]
pub struct ProtoSchema {
    pool: DescriptorPool,
}

impl ProtoSchema {
    /// Compile a set of sources as one unit.
    ///
    /// Files may import each other by name; `google/protobuf/*.proto` imports
    /// resolve to the bundled well-known types.
    pub fn compile(origin: &Path, files: &[SchemaFile]) -> Result<Self> {
        Self::build(origin, files, None)
    }

    /// Like [`ProtoSchema::compile`], but imports not found among `files`
    /// are also read from disk relative to `include`.
    pub fn compile_with_include(origin: &Path, files: &[SchemaFile], include: &Path) -> Result<Self> {
        Self::build(origin, files, Some(include))
    }

    fn build(origin: &Path, files: &[SchemaFile], include: Option<&Path>) -> Result<Self> {
        if files.is_empty() {
            return Err(RegistryError::parse(origin, "no schema sources"));
        }

        let sources = SourceResolver {
            files: files
                .iter()
                .map(|f| (f.name.clone(), f.contents.clone()))
                .collect(),
        };
        let mut resolver = ChainFileResolver::new();
        resolver.add(sources);
        if let Some(include) = include {
            resolver.add(IncludeFileResolver::new(include.to_path_buf()));
        }
        resolver.add(GoogleFileResolver::new());

        let mut compiler = Compiler::with_file_resolver(resolver);
        compiler.include_imports(true);
        for file in files {
            compiler
                .open_file(&file.name)
                .map_err(|e| RegistryError::parse(origin, e))?;
        }

        Ok(Self {
            pool: compiler.descriptor_pool(),
        })
    }

    /// Whether `name` names a message, enum, service, package, or a field or
    /// oneof of a message
    pub fn has(&self, name: &str) -> bool {
        let name = name.strip_prefix('.').unwrap_or(name);
        if name.is_empty() {
            return false;
        }

        self.pool.get_message_by_name(name).is_some()
            || self.pool.get_enum_by_name(name).is_some()
            || self.pool.get_service_by_name(name).is_some()
            || self.pool.files().any(|file| {
                let package = file.package_name();
                package == name
                    || package
                        .strip_prefix(name)
                        .is_some_and(|rest| rest.starts_with('.'))
            })
            || name.rsplit_once('.').is_some_and(|(parent, member)| {
                self.pool.get_message_by_name(parent).is_some_and(|message| {
                    message.get_field_by_name(member).is_some()
                        || message.oneofs().any(|oneof| oneof.name() == member)
                })
            })
    }

    /// Fully-qualified names of every message type
    pub fn message_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pool
            .all_messages()
            .filter(|m| !m.is_map_entry())
            .map(|m| m.full_name().to_string())
            .collect();
        names.sort();
        names
    }

    fn message(&self, route: &str, type_name: &str) -> Result<MessageDescriptor> {
        let lookup = type_name.strip_prefix('.').unwrap_or(type_name);
        if let Some(message) = self.pool.get_message_by_name(lookup) {
            return Ok(message);
        }
        if self.pool.get_enum_by_name(lookup).is_some() {
            return Err(RegistryError::NotAMessage(type_name.to_string()));
        }
        Err(RegistryError::UnknownRoute {
            route: route.to_string(),
            type_name: type_name.to_string(),
        })
    }

    /// Verify `value` against the message type and serialize it.
    ///
    /// `bytes` fields take either a base64 string or an array of byte values.
    pub fn encode(&self, route: &str, type_name: &str, value: &Value) -> Result<Vec<u8>> {
        let descriptor = self.message(route, type_name)?;
        verify_message(&descriptor, value)?;

        let mut value = value.clone();
        byte_arrays_to_base64(&descriptor, &mut value);

        let options = prost_reflect::DeserializeOptions::new().deny_unknown_fields(false);
        let message = DynamicMessage::deserialize_with_options(descriptor.clone(), &value, &options)
            .map_err(|e| RegistryError::Encode {
                type_name: descriptor.full_name().to_string(),
                reason: e.to_string(),
            })?;

        Ok(message.encode_to_vec())
    }

    /// Decode wire bytes into a plain JSON tree keyed by proto field names
    pub fn decode(&self, route: &str, type_name: &str, bytes: &[u8]) -> Result<Value> {
        let descriptor = self.message(route, type_name)?;
        let message = DynamicMessage::decode(descriptor, bytes)?;

        let options = SerializeOptions::new().use_proto_field_name(true);
        let value = message.serialize_with_options(serde_json::value::Serializer, &options)?;
        Ok(value)
    }
}

/// Rewrite byte arrays held by `bytes` fields as base64 strings, the only
/// form the JSON mapping deserializes
fn byte_arrays_to_base64(descriptor: &MessageDescriptor, value: &mut Value) {
    let Some(object) = value.as_object_mut() else {
        return;
    };

    for field in descriptor.fields() {
        let key = if object.contains_key(field.name()) {
            field.name()
        } else {
            field.json_name()
        };
        let Some(item) = object.get_mut(key) else {
            continue;
        };

        if field.is_map() {
            let Kind::Message(entry) = field.kind() else {
                continue;
            };
            let value_kind = entry.map_entry_value_field().kind();
            if let Some(entries) = item.as_object_mut() {
                for entry_value in entries.values_mut() {
                    rewrite_bytes(&value_kind, entry_value);
                }
            }
        } else if field.is_list() {
            let kind = field.kind();
            if let Some(items) = item.as_array_mut() {
                for element in items {
                    rewrite_bytes(&kind, element);
                }
            }
        } else {
            rewrite_bytes(&field.kind(), item);
        }
    }
}

fn rewrite_bytes(kind: &Kind, value: &mut Value) {
    match kind {
        Kind::Bytes if is_byte_array(value) => {
            let bytes: Vec<u8> = value
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                        .collect()
                })
                .unwrap_or_default();
            *value = Value::String(STANDARD.encode(bytes));
        }
        Kind::Message(nested) => byte_arrays_to_base64(nested, value),
        _ => {}
    }
}
