//! The configuration record: the sole persistent output of a run.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::capability::{CapabilityKind, ResolvedValue};

/// Package identity strings, serialized verbatim into the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub bugreport: String,
    #[serde(default)]
    pub url: String,
    /// Defaults to [`default_tarname`] of `name` when empty.
    #[serde(default)]
    pub tarname: String,
}

impl PackageMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            tarname: default_tarname(&name),
            name,
            version: version.into(),
            bugreport: String::new(),
            url: String::new(),
        }
    }

    pub fn with_bugreport(mut self, bugreport: impl Into<String>) -> Self {
        self.bugreport = bugreport.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_tarname(mut self, tarname: impl Into<String>) -> Self {
        self.tarname = tarname.into();
        self
    }

    /// Fill the tarname from the name if it was left empty.
    pub fn normalized(mut self) -> Self {
        if self.tarname.is_empty() {
            self.tarname = default_tarname(&self.name);
        }
        self
    }

    /// `"<name> <version>"`.
    pub fn package_string(&self) -> String {
        format!("{} {}", self.name, self.version)
    }
}

/// Lower-cased name with every non-alphanumeric character replaced by `-`.
pub fn default_tarname(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// How an entry received its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    Probed,
    Override,
    Declared,
    /// Not probed because these dependencies did not resolve present.
    Propagated { missing: Vec<String> },
    /// Indeterminate probe replaced by the declared default.
    Defaulted,
    /// Indeterminate probe with no default.
    CoercedAbsent,
}

impl Provenance {
    pub fn name(&self) -> &'static str {
        match self {
            Provenance::Probed => "probed",
            Provenance::Override => "override",
            Provenance::Declared => "declared",
            Provenance::Propagated { .. } => "propagated",
            Provenance::Defaulted => "defaulted",
            Provenance::CoercedAbsent => "coerced_absent",
        }
    }
}

/// One resolved capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub name: String,
    pub kind: CapabilityKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    pub value: ResolvedValue,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub guarded: bool,
}

impl RecordEntry {
    pub fn is_enabled(&self) -> bool {
        self.value.is_present()
    }
}

/// Immutable result of resolution; entries follow declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    pub package: PackageMetadata,
    /// Toolchain fingerprint the record was resolved against, if taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<String>,
    entries: Vec<RecordEntry>,
}

impl ConfigurationRecord {
    pub fn new(
        package: PackageMetadata,
        toolchain: Option<String>,
        entries: Vec<RecordEntry>,
    ) -> Self {
        Self {
            package,
            toolchain,
            entries,
        }
    }

    pub fn with_toolchain(mut self, toolchain: Option<String>) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn entries(&self) -> &[RecordEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, name: &str) -> Option<&RecordEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedValue> {
        self.entry(name).map(|e| &e.value)
    }

    /// False for unknown names as well as absent capabilities.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.entry(name).is_some_and(RecordEntry::is_enabled)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            ResolvedValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            ResolvedValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// SHA-256 over the canonical form of package and entries.
    ///
    /// Provenance is excluded: two records that emit the same header share
    /// a digest.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        let p = &self.package;
        for field in [&p.name, &p.version, &p.bugreport, &p.url, &p.tarname] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        for entry in &self.entries {
            hasher.update(entry.name.as_bytes());
            hasher.update(b"=");
            hasher.update(entry.value.canonical().as_bytes());
            hasher.update([u8::from(entry.guarded)]);
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}
