//! TOML capability catalogs.
//!
//! ```toml
//! [package]
//! name = "libsframe"
//! version = "BFD_VERSION"
//!
//! [[capability]]
//! kind = "header"
//! subject = "byteswap.h"
//!
//! [[capability]]
//! kind = "declaration"
//! subject = "bswap_16"
//! includes = ["byteswap.h"]
//! requires = ["HAVE_BYTESWAP_H"]
//! ```
//!
//! Names are derived from kind and subject when omitted; `behavioral`,
//! `integer` and `define` entries must name themselves unless a subject
//! is given. Declaration order in the file is the emission order.

use std::path::Path;

use serde::Deserialize;

use crate::capability::{macro_name, Capability, CapabilityKind, ResolvedValue};
use crate::error::{ConfigureError, Result};
use crate::record::PackageMetadata;
use crate::registry::ProbeRegistry;

/// A parsed catalog file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    pub package: PackageMetadata,
    #[serde(default, rename = "capability")]
    pub capabilities: Vec<CatalogEntry>,
}

/// Scalar as written in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CatalogValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl From<CatalogValue> for ResolvedValue {
    fn from(value: CatalogValue) -> Self {
        match value {
            CatalogValue::Bool(b) => ResolvedValue::Flag(b),
            CatalogValue::Integer(v) => ResolvedValue::Integer(v),
            CatalogValue::Text(s) => ResolvedValue::Text(s),
        }
    }
}

/// One `[[capability]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogEntry {
    #[serde(default)]
    pub name: Option<String>,
    pub kind: CapabilityKind,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub default: Option<CatalogValue>,
    /// Declared value of a `define`; omitted means "leave undefined".
    #[serde(default)]
    pub value: Option<CatalogValue>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub guarded: bool,
    #[serde(default)]
    pub core: Option<bool>,
}

impl CatalogEntry {
    fn into_capability(self, position: usize) -> Result<Capability> {
        let subject = self.subject.unwrap_or_default();
        let missing = |what: &str| {
            ConfigureError::Catalog(format!(
                "capability #{} ({}) needs a {}",
                position + 1,
                self.kind,
                what
            ))
        };

        let mut capability = match self.kind {
            CapabilityKind::Header if !subject.is_empty() => Capability::header(&subject),
            CapabilityKind::Function if !subject.is_empty() => Capability::function(&subject),
            CapabilityKind::Declaration if !subject.is_empty() => {
                Capability::declaration(&subject)
            }
            CapabilityKind::Header | CapabilityKind::Function | CapabilityKind::Declaration => {
                return Err(missing("subject"))
            }
            CapabilityKind::Behavioral => {
                let name = match (&self.name, subject.is_empty()) {
                    (Some(name), _) => name.clone(),
                    (None, false) => macro_name("HAVE", &subject),
                    (None, true) => return Err(missing("name or subject")),
                };
                Capability::behavioral(name, self.program.clone().unwrap_or_default())
                    .with_subject(subject)
            }
            CapabilityKind::Integer => {
                let name = self.name.clone().ok_or_else(|| missing("name"))?;
                Capability::integer(name, subject)
            }
            CapabilityKind::Define => {
                let name = self.name.clone().ok_or_else(|| missing("name"))?;
                let value = self
                    .value
                    .clone()
                    .map(ResolvedValue::from)
                    .unwrap_or(ResolvedValue::Undefined);
                Capability::define(name, value)
            }
        };

        if let Some(name) = self.name {
            capability = capability.named(name);
        }
        capability = capability.with_includes(self.includes);
        for dependency in self.requires {
            capability = capability.depends_on(dependency);
        }
        if let Some(default) = self.default {
            capability = capability.with_default(default.into());
        }
        if let Some(description) = self.description {
            capability = capability.with_description(description);
        }
        if self.guarded {
            capability = capability.guarded();
        }
        if self.core == Some(false) {
            capability = capability.non_core();
        }
        Ok(capability)
    }
}

impl Catalog {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigureError::Catalog(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Package metadata with a derived tarname filled in.
    pub fn package(&self) -> PackageMetadata {
        self.package.clone().normalized()
    }

    /// Build a registry in file order.
    pub fn registry(&self) -> Result<ProbeRegistry> {
        let mut registry = ProbeRegistry::new();
        for (position, entry) in self.capabilities.iter().cloned().enumerate() {
            registry.register(entry.into_capability(position)?)?;
        }
        Ok(registry)
    }
}
