//! Static registry of synchronized tables

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One local table and the remote table it mirrors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableMapping {
    pub local: String,
    pub remote: String,
}

/// Local → remote table name registry, in sync order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableRegistry {
    mappings: Vec<TableMapping>,
}

impl TableRegistry {
    /// Build a registry, rejecting blank or duplicate names.
    pub fn new<I, L, R>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (L, R)>,
        L: Into<String>,
        R: Into<String>,
    {
        let mut registry = Self::default();
        for (local, remote) in pairs {
            registry.register(local, remote)?;
        }
        Ok(registry)
    }

    /// Add a mapping.
    pub fn register(&mut self, local: impl Into<String>, remote: impl Into<String>) -> Result<()> {
        let local = local.into().trim().to_string();
        let remote = remote.into().trim().to_string();
        if local.is_empty() || remote.is_empty() {
            return Err(Error::InvalidInput("table names must not be empty".into()));
        }
        if self.remote_name(&local).is_some() {
            return Err(Error::InvalidInput(format!("table '{local}' registered twice")));
        }
        if self.local_name(&remote).is_some() {
            return Err(Error::InvalidInput(format!(
                "remote table '{remote}' mapped twice"
            )));
        }
        self.mappings.push(TableMapping { local, remote });
        Ok(())
    }

    pub fn remote_name(&self, local: &str) -> Option<&str> {
        self.mappings
            .iter()
            .find(|mapping| mapping.local == local)
            .map(|mapping| mapping.remote.as_str())
    }

    pub fn local_name(&self, remote: &str) -> Option<&str> {
        self.mappings
            .iter()
            .find(|mapping| mapping.remote == remote)
            .map(|mapping| mapping.local.as_str())
    }

    pub fn mappings(&self) -> impl Iterator<Item = &TableMapping> {
        self.mappings.iter()
    }

    /// Local table names in registration order.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.mappings.iter().map(|mapping| mapping.local.as_str())
    }

    pub fn remote_tables(&self) -> Vec<String> {
        self.mappings
            .iter()
            .map(|mapping| mapping.remote.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
