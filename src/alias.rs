//! Route alias tables
//!
//! Maps short route strings to fully-qualified schema type names. A route
//! without an entry resolves to itself.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Flat route → type name mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteAliasTable {
    aliases: HashMap<String, String>,
}

impl RouteAliasTable {
    /// An empty table; every route resolves to itself
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object of string values
    pub fn from_json(path: &Path, contents: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(contents).map_err(|e| RegistryError::parse(path, e))?;
        let object = value
            .as_object()
            .ok_or_else(|| RegistryError::parse(path, "route table must be a JSON object"))?;

        let mut aliases = HashMap::with_capacity(object.len());
        for (route, target) in object {
            let target = target.as_str().ok_or_else(|| {
                RegistryError::parse(path, format!("alias for route '{}' is not a string", route))
            })?;
            aliases.insert(route.clone(), target.to_string());
        }

        Ok(Self { aliases })
    }

    /// Resolve a route to its type name
    pub fn resolve<'a>(&'a self, route: &'a str) -> &'a str {
        match self.aliases.get(route) {
            Some(target) if !target.is_empty() => target,
            _ => route,
        }
    }

    /// Merge another table into this one; entries from `other` win
    pub fn extend(&mut self, other: RouteAliasTable) {
        self.aliases.extend(other.aliases);
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

impl FromIterator<(String, String)> for RouteAliasTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            aliases: iter.into_iter().collect(),
        }
    }
}
