//! Copy option parsing and validation.
//!
//! Options arrive as untyped name/value pairs. They are checked once, before
//! the first batch is read, against the set the source kind recognizes.

use std::fmt;

use llgraph_result::{Error, Result};

use crate::csv::CsvReadOptions;

/// A literal option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl OptionValue {
    fn type_name(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "BOOL",
            OptionValue::Int(_) => "INT64",
            OptionValue::Str(_) => "STRING",
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Int(i) => write!(f, "{i}"),
            OptionValue::Str(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Str(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Str(v)
    }
}

/// The kind of source a copy reads from. Each kind has its own scanner and
/// its own set of recognized options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Arrow,
    DataFrame,
    Csv,
    Subquery,
}

const COMMON_OPTIONS: &[&str] = &["IGNORE_ERRORS", "FROM", "TO"];
const CSV_OPTIONS: &[&str] = &["IGNORE_ERRORS", "FROM", "TO", "HEADER", "DELIM", "BATCH_SIZE"];

impl SourceKind {
    pub fn recognized_options(self) -> &'static [&'static str] {
        match self {
            SourceKind::Csv => CSV_OPTIONS,
            SourceKind::Arrow | SourceKind::DataFrame | SourceKind::Subquery => COMMON_OPTIONS,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Arrow => "Arrow",
            SourceKind::DataFrame => "DataFrame",
            SourceKind::Csv => "CSV",
            SourceKind::Subquery => "subquery",
        };
        f.write_str(name)
    }
}

/// Options of one copy statement, keyed by upper-cased name.
///
/// Setting the same option twice keeps the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    entries: Vec<(String, OptionValue)>,
}

impl CopyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<OptionValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<OptionValue>) {
        let key = name.to_ascii_uppercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        let key = name.to_ascii_uppercase();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Typed result of option validation.
#[derive(Debug, Clone, Default)]
pub struct ValidatedOptions {
    pub ignore_errors: bool,
    pub from: Option<String>,
    pub to: Option<String>,
    pub csv: CsvReadOptions,
}

pub struct OptionValidator;

impl OptionValidator {
    /// Check every option against the set `kind` recognizes and convert the
    /// values. The first unrecognized name fails the whole statement.
    pub fn validate(kind: SourceKind, options: &CopyOptions) -> Result<ValidatedOptions> {
        let recognized = kind.recognized_options();
        let mut validated = ValidatedOptions::default();
        for (name, value) in options.iter() {
            if !recognized.contains(&name) {
                return Err(Error::unrecognized_option(name, kind));
            }
            match name {
                "IGNORE_ERRORS" => validated.ignore_errors = expect_bool(name, value)?,
                "FROM" => validated.from = Some(expect_str(name, value)?.to_string()),
                "TO" => validated.to = Some(expect_str(name, value)?.to_string()),
                "HEADER" => validated.csv.has_header = expect_bool(name, value)?,
                "DELIM" => validated.csv.delimiter = expect_delimiter(value)?,
                "BATCH_SIZE" => {
                    let size = match value {
                        OptionValue::Int(n) if *n > 0 => *n as usize,
                        OptionValue::Int(n) => {
                            return Err(Error::InvalidOption(format!(
                                "BATCH_SIZE must be positive, got {n}."
                            )));
                        }
                        other => return Err(wrong_type(name, "INT64", other)),
                    };
                    validated.csv.batch_size = Some(size);
                }
                _ => return Err(Error::unrecognized_option(name, kind)),
            }
        }
        tracing::trace!("[COPY] validated {kind} options: {validated:?}");
        Ok(validated)
    }
}

fn expect_bool(name: &str, value: &OptionValue) -> Result<bool> {
    match value {
        OptionValue::Bool(b) => Ok(*b),
        other => Err(wrong_type(name, "BOOL", other)),
    }
}

fn expect_str<'a>(name: &str, value: &'a OptionValue) -> Result<&'a str> {
    match value {
        OptionValue::Str(s) => Ok(s),
        other => Err(wrong_type(name, "STRING", other)),
    }
}

fn expect_delimiter(value: &OptionValue) -> Result<u8> {
    let s = expect_str("DELIM", value)?;
    let unescaped = if s == "\\t" { "\t" } else { s };
    match unescaped.as_bytes() {
        [b] => Ok(*b),
        _ => Err(Error::InvalidOption(format!(
            "DELIM must be a single ASCII character, got {value}."
        ))),
    }
}

fn wrong_type(name: &str, expected: &str, value: &OptionValue) -> Error {
    Error::InvalidOption(format!(
        "{name} expects a {expected} value, got {value} of type {}.",
        value.type_name()
    ))
}
