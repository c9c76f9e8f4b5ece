//! Serialization of a [`ConfigurationRecord`].
//!
//! Three forms are produced from the same record:
//! - [`HeaderEmitter`]: the `config.h` text consumed by C builds
//! - [`JsonEmitter`]: a machine-readable report with provenance
//! - [`SummaryEmitter`]: `checking for ...` lines for humans
//!
//! Output depends only on the record. Entries follow record order, and
//! nothing time- or host-dependent is written.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::capability::{CapabilityKind, ResolvedValue};
use crate::error::Result;
use crate::record::{ConfigurationRecord, PackageMetadata, Provenance, RecordEntry};

/// Version of the emitted formats. Bumped on any change to their layout.
pub const FORMAT_VERSION: u32 = 1;

const COMMENT_WIDTH: usize = 76;

/// Renders a record into one textual form.
pub trait Emitter {
    fn emit(&self, record: &ConfigurationRecord) -> Result<String>;
}

/// `config.h` writer.
#[derive(Debug, Clone, Default)]
pub struct HeaderEmitter {
    /// Name of the catalog the record came from, shown in the banner.
    source: Option<String>,
}

impl HeaderEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn banner(&self, out: &mut String) {
        match &self.source {
            Some(source) => out.push_str(&format!(
                "/* config.h.  Generated from {} by cfgprobe.  */\n",
                source
            )),
            None => out.push_str("/* config.h.  Generated by cfgprobe.  */\n"),
        }
        out.push_str(&format!("/* cfgprobe header format {}.  */\n", FORMAT_VERSION));
    }

    fn package_block(&self, package: &PackageMetadata, out: &mut String) {
        let package_string = package.package_string();
        let fields: [(&str, &str, &str); 8] = [
            ("PACKAGE", "Name of package", package.tarname.as_str()),
            (
                "PACKAGE_BUGREPORT",
                "Define to the address where bug reports for this package should be sent.",
                package.bugreport.as_str(),
            ),
            ("PACKAGE_NAME", "Define to the full name of this package.", package.name.as_str()),
            (
                "PACKAGE_STRING",
                "Define to the full name and version of this package.",
                package_string.as_str(),
            ),
            (
                "PACKAGE_TARNAME",
                "Define to the one symbol short name of this package.",
                package.tarname.as_str(),
            ),
            ("PACKAGE_URL", "Define to the home page for this package.", package.url.as_str()),
            ("PACKAGE_VERSION", "Define to the version of this package.", package.version.as_str()),
            ("VERSION", "Version number of package", package.version.as_str()),
        ];
        for (name, description, value) in fields {
            out.push('\n');
            push_comment(out, description);
            out.push_str(&format!("#define {} {}\n", name, c_string(value)));
        }
    }

    fn entry(&self, entry: &RecordEntry, out: &mut String) {
        out.push('\n');
        if let Some(description) = &entry.description {
            push_comment(out, description);
        }
        match (definition(entry), entry.guarded) {
            (Some(value), true) => out.push_str(&format!(
                "#ifndef {name}\n# define {name} {value}\n#endif\n",
                name = entry.name
            )),
            (Some(value), false) => out.push_str(&format!("#define {} {}\n", entry.name, value)),
            (None, _) => out.push_str(&format!("/* #undef {} */\n", entry.name)),
        }
    }
}

impl Emitter for HeaderEmitter {
    fn emit(&self, record: &ConfigurationRecord) -> Result<String> {
        let mut out = String::new();
        self.banner(&mut out);
        self.package_block(&record.package, &mut out);
        for entry in record.entries() {
            self.entry(entry, &mut out);
        }
        Ok(out)
    }
}

/// The right-hand side of `#define NAME ...`, or `None` for a commented `#undef`.
fn definition(entry: &RecordEntry) -> Option<String> {
    match &entry.value {
        ResolvedValue::Flag(true) => Some("1".to_string()),
        // Declarations always carry a literal; presence kinds never emit 0.
        ResolvedValue::Flag(false) if entry.kind == CapabilityKind::Declaration => {
            Some("0".to_string())
        }
        ResolvedValue::Flag(false) | ResolvedValue::Undefined => None,
        ResolvedValue::Integer(v) => Some(v.to_string()),
        ResolvedValue::Text(s) => Some(c_string(s)),
    }
}

/// Quote as a C string literal.
pub fn c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\{:03o}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// `/* text */`, word-wrapped with continuation lines indented to the text.
fn push_comment(out: &mut String, text: &str) {
    let mut line = String::from("/*");
    let mut line_has_words = false;
    for word in text.split_whitespace() {
        if line_has_words && line.len() + 1 + word.len() > COMMENT_WIDTH {
            out.push_str(&line);
            out.push('\n');
            line = String::from("  ");
        }
        line.push(' ');
        line.push_str(word);
        line_has_words = true;
    }
    out.push_str(&line);
    out.push_str(" */\n");
}

#[derive(Serialize)]
struct Report<'a> {
    format_version: u32,
    generator: &'static str,
    digest: String,
    package: &'a PackageMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    toolchain: Option<&'a str>,
    entries: &'a [RecordEntry],
}

/// Pretty-printed JSON report.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEmitter;

impl Emitter for JsonEmitter {
    fn emit(&self, record: &ConfigurationRecord) -> Result<String> {
        let report = Report {
            format_version: FORMAT_VERSION,
            generator: concat!("cfgprobe ", env!("CARGO_PKG_VERSION")),
            digest: record.digest(),
            package: &record.package,
            toolchain: record.toolchain.as_deref(),
            entries: record.entries(),
        };
        let mut json = serde_json::to_string_pretty(&report)?;
        json.push('\n');
        Ok(json)
    }
}

/// One `checking ...` line per probed capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryEmitter;

impl SummaryEmitter {
    fn question(entry: &RecordEntry) -> Option<String> {
        let subject = if entry.subject.is_empty() {
            entry.name.as_str()
        } else {
            entry.subject.as_str()
        };
        match entry.kind {
            CapabilityKind::Header | CapabilityKind::Function => {
                Some(format!("checking for {}", subject))
            }
            CapabilityKind::Declaration => Some(format!("checking whether {} is declared", subject)),
            CapabilityKind::Behavioral => Some(format!("checking for working {}", subject)),
            CapabilityKind::Integer => Some(format!("checking value of {}", subject)),
            CapabilityKind::Define => None,
        }
    }

    fn answer(entry: &RecordEntry) -> String {
        let value = match &entry.value {
            ResolvedValue::Text(s) => s.clone(),
            ResolvedValue::Undefined if entry.kind == CapabilityKind::Integer => {
                "unknown".to_string()
            }
            other => other.to_string(),
        };
        match &entry.provenance {
            Provenance::Probed | Provenance::Declared => value,
            Provenance::Override => format!("{} (override)", value),
            Provenance::Propagated { missing } => {
                format!("{} (requires {})", value, missing.join(", "))
            }
            Provenance::Defaulted => format!("{} (default, probe inconclusive)", value),
            Provenance::CoercedAbsent => format!("{} (probe inconclusive)", value),
        }
    }
}

impl Emitter for SummaryEmitter {
    fn emit(&self, record: &ConfigurationRecord) -> Result<String> {
        let mut out = String::new();
        for entry in record.entries() {
            if let Some(question) = Self::question(entry) {
                out.push_str(&format!("{}... {}\n", question, Self::answer(entry)));
            }
        }
        Ok(out)
    }
}

/// Result of [`write_if_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The file already held identical content and was not touched.
    Unchanged,
}

/// Atomically replace `path` with `content` unless it already matches.
///
/// The new content goes to a temporary file in the same directory and is
/// renamed into place, so readers never observe a partial file.
pub fn write_if_changed(path: &Path, content: &str) -> Result<WriteOutcome> {
    match fs::read(path) {
        Ok(existing) if existing == content.as_bytes() => return Ok(WriteOutcome::Unchanged),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(WriteOutcome::Written)
}
