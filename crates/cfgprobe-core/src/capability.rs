//! Capability declarations.
//!
//! A [`Capability`] names one detectable fact about the target environment
//! and carries everything needed to probe and emit it. The capability name
//! is also the macro name written to the config header.

use serde::{Deserialize, Serialize};

/// What kind of fact a capability describes.
///
/// Presence kinds (`header`, `function`, `behavioral`) are emitted as
/// `#define NAME 1` or a commented `#undef`. `declaration` always emits a
/// literal 0 or 1. `integer` and `define` carry arbitrary values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// A header can be included.
    Header,
    /// A function links.
    Function,
    /// A symbol is declared (function, macro or variable).
    Declaration,
    /// A test program builds, runs and exits 0.
    Behavioral,
    /// A test program prints an integer (e.g. `sizeof(long)`).
    Integer,
    /// A declared constant; never probed.
    Define,
}

impl CapabilityKind {
    pub fn name(&self) -> &'static str {
        match self {
            CapabilityKind::Header => "header",
            CapabilityKind::Function => "function",
            CapabilityKind::Declaration => "declaration",
            CapabilityKind::Behavioral => "behavioral",
            CapabilityKind::Integer => "integer",
            CapabilityKind::Define => "define",
        }
    }

    /// Whether resolving this kind requires running a probe.
    pub fn is_probed(&self) -> bool {
        !matches!(self, CapabilityKind::Define)
    }

    /// Whether absence is emitted as a commented `#undef`.
    pub fn is_presence(&self) -> bool {
        matches!(
            self,
            CapabilityKind::Header | CapabilityKind::Function | CapabilityKind::Behavioral
        )
    }

    /// The value an absent capability of this kind resolves to.
    pub fn absent_value(&self) -> ResolvedValue {
        match self {
            CapabilityKind::Header
            | CapabilityKind::Function
            | CapabilityKind::Behavioral
            | CapabilityKind::Declaration => ResolvedValue::Flag(false),
            CapabilityKind::Integer | CapabilityKind::Define => ResolvedValue::Undefined,
        }
    }

    /// The value a present capability of this kind resolves to when the
    /// probe reported no associated value.
    pub fn present_value(&self) -> Option<ResolvedValue> {
        match self {
            CapabilityKind::Header
            | CapabilityKind::Function
            | CapabilityKind::Behavioral
            | CapabilityKind::Declaration => Some(ResolvedValue::Flag(true)),
            CapabilityKind::Integer | CapabilityKind::Define => None,
        }
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A concrete resolved value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedValue {
    Flag(bool),
    Integer(i64),
    Text(String),
    Undefined,
}

impl ResolvedValue {
    /// Whether a dependent capability may treat this value as "available".
    pub fn is_present(&self) -> bool {
        match self {
            ResolvedValue::Flag(b) => *b,
            ResolvedValue::Integer(_) | ResolvedValue::Text(_) => true,
            ResolvedValue::Undefined => false,
        }
    }

    /// Parse an invoker-supplied value for a capability of `kind`.
    ///
    /// Returns `None` when `raw` is not meaningful for that kind.
    pub fn parse_for(kind: CapabilityKind, raw: &str) -> Option<ResolvedValue> {
        let raw = raw.trim();
        match kind {
            CapabilityKind::Header
            | CapabilityKind::Function
            | CapabilityKind::Behavioral
            | CapabilityKind::Declaration => parse_flag(raw).map(ResolvedValue::Flag),
            CapabilityKind::Integer => match raw {
                "undef" | "" => Some(ResolvedValue::Undefined),
                other => other.parse::<i64>().ok().map(ResolvedValue::Integer),
            },
            CapabilityKind::Define => Some(match raw {
                "undef" | "" => ResolvedValue::Undefined,
                other => match other.parse::<i64>() {
                    Ok(v) => ResolvedValue::Integer(v),
                    Err(_) => ResolvedValue::Text(
                        other
                            .strip_prefix('"')
                            .and_then(|s| s.strip_suffix('"'))
                            .unwrap_or(other)
                            .to_string(),
                    ),
                },
            }),
        }
    }

    /// Stable textual form used for hashing records.
    pub fn canonical(&self) -> String {
        match self {
            ResolvedValue::Flag(b) => format!("flag:{}", b),
            ResolvedValue::Integer(v) => format!("int:{}", v),
            ResolvedValue::Text(s) => format!("text:{}", s),
            ResolvedValue::Undefined => "undef".to_string(),
        }
    }
}

impl std::fmt::Display for ResolvedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedValue::Flag(true) => f.write_str("yes"),
            ResolvedValue::Flag(false) | ResolvedValue::Undefined => f.write_str("no"),
            ResolvedValue::Integer(v) => write!(f, "{}", v),
            ResolvedValue::Text(s) => write!(f, "\"{}\"", s),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// One declared, probeable fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Unique name; also the emitted macro name.
    pub name: String,

    pub kind: CapabilityKind,

    /// Header file, symbol or integer expression under test.
    #[serde(default)]
    pub subject: String,

    /// Headers included ahead of the test unit.
    #[serde(default)]
    pub includes: Vec<String>,

    /// Complete test program for `behavioral` capabilities.
    #[serde(default)]
    pub program: Option<String>,

    /// Capabilities that must resolve present before this one is probed.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Value used when the probe is indeterminate.
    #[serde(default)]
    pub default_on_indeterminate: Option<ResolvedValue>,

    /// Declared value for `define` capabilities.
    #[serde(default)]
    pub value: Option<ResolvedValue>,

    /// Comment emitted above the definition.
    #[serde(default)]
    pub description: Option<String>,

    /// Emit inside an `#ifndef NAME` guard.
    #[serde(default)]
    pub guarded: bool,

    /// Counts toward the majority-failure threshold.
    #[serde(default = "default_core")]
    pub core: bool,
}

fn default_core() -> bool {
    true
}

impl Capability {
    fn base(name: String, kind: CapabilityKind, subject: String) -> Self {
        Self {
            name,
            kind,
            subject,
            includes: Vec::new(),
            program: None,
            dependencies: Vec::new(),
            default_on_indeterminate: None,
            value: None,
            description: None,
            guarded: false,
            core: true,
        }
    }

    /// `HAVE_<HEADER>`: the header can be included.
    pub fn header(header: &str) -> Self {
        let mut cap = Self::base(
            macro_name("HAVE", header),
            CapabilityKind::Header,
            header.to_string(),
        );
        cap.description = Some(format!("Define to 1 if you have the <{}> header file.", header));
        cap
    }

    /// `HAVE_<FUNCTION>`: the function links.
    pub fn function(function: &str) -> Self {
        let mut cap = Self::base(
            macro_name("HAVE", function),
            CapabilityKind::Function,
            function.to_string(),
        );
        cap.description = Some(format!("Define to 1 if you have the `{}' function.", function));
        cap
    }

    /// `HAVE_DECL_<SYMBOL>`: the symbol is declared.
    pub fn declaration(symbol: &str) -> Self {
        let mut cap = Self::base(
            macro_name("HAVE_DECL", symbol),
            CapabilityKind::Declaration,
            symbol.to_string(),
        );
        cap.description = Some(format!(
            "Define to 1 if you have the declaration of `{}', and to 0 if you don't.",
            symbol
        ));
        cap
    }

    /// A runtime behaviour check; `program` must exit 0 when the behaviour holds.
    pub fn behavioral(name: impl Into<String>, program: impl Into<String>) -> Self {
        let mut cap = Self::base(name.into(), CapabilityKind::Behavioral, String::new());
        cap.program = Some(program.into());
        cap
    }

    /// An integer-valued check; `expression` is evaluated by a test program.
    pub fn integer(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::base(name.into(), CapabilityKind::Integer, expression.into())
    }

    /// A declared constant.
    pub fn define(name: impl Into<String>, value: ResolvedValue) -> Self {
        let mut cap = Self::base(name.into(), CapabilityKind::Define, String::new());
        cap.value = Some(value);
        cap
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_includes<I, S>(mut self, includes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes.extend(includes.into_iter().map(Into::into));
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_default(mut self, value: ResolvedValue) -> Self {
        self.default_on_indeterminate = Some(value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn guarded(mut self) -> Self {
        self.guarded = true;
        self
    }

    /// Exclude from majority-failure accounting.
    pub fn non_core(mut self) -> Self {
        self.core = false;
        self
    }

    pub fn absent_value(&self) -> ResolvedValue {
        self.kind.absent_value()
    }

    /// Check that the declaration is complete for its kind.
    pub fn validate(&self) -> Result<(), String> {
        if !is_c_identifier(&self.name) {
            return Err("name is not a valid C identifier".to_string());
        }
        match self.kind {
            CapabilityKind::Header
            | CapabilityKind::Function
            | CapabilityKind::Declaration
            | CapabilityKind::Integer
                if self.subject.trim().is_empty() =>
            {
                return Err(format!("{} capability needs a subject", self.kind));
            }
            CapabilityKind::Behavioral
                if self.program.as_deref().map_or(true, |p| p.trim().is_empty()) =>
            {
                return Err("behavioral capability needs a program".to_string());
            }
            CapabilityKind::Define if self.value.is_none() => {
                return Err("define capability needs a value".to_string());
            }
            _ => {}
        }
        if let Some(default) = &self.default_on_indeterminate {
            if !default_fits(self.kind, default) {
                return Err(format!(
                    "default {:?} does not fit a {} capability",
                    default, self.kind
                ));
            }
        }
        Ok(())
    }
}

fn default_fits(kind: CapabilityKind, value: &ResolvedValue) -> bool {
    match kind {
        CapabilityKind::Header
        | CapabilityKind::Function
        | CapabilityKind::Behavioral
        | CapabilityKind::Declaration => matches!(value, ResolvedValue::Flag(_)),
        CapabilityKind::Integer => {
            matches!(value, ResolvedValue::Integer(_) | ResolvedValue::Undefined)
        }
        CapabilityKind::Define => true,
    }
}

/// Build a macro name the way autoheader does: upper-case, every
/// character outside `[A-Z0-9_]` becomes `_`.
pub fn macro_name(prefix: &str, subject: &str) -> String {
    let body: String = subject
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if prefix.is_empty() {
        body
    } else {
        format!("{}_{}", prefix, body)
    }
}

/// Whether `s` is usable as a C macro name.
pub fn is_c_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
