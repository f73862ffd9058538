use crate::error::EnvError;
use std::collections::HashMap;

/// Where `${NAME}` references look their values up.
pub trait VariableSource: Send + Sync {
    fn lookup(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl VariableSource for ProcessEnv {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed set of variables, for hosts that sandbox the environment and for tests.
#[derive(Debug, Default, Clone)]
pub struct MapEnv {
    variables: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        MapEnv {
            variables: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl VariableSource for MapEnv {
    fn lookup(&self, name: &str) -> Option<String> {
        self.variables.get(name).cloned()
    }
}

/// The parts of a `${NAME}` or `${NAME:-default}` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvReference<'a> {
    pub name: &'a str,
    pub default: Option<&'a str>,
}

pub fn parse_reference(text: &str) -> Result<EnvReference<'_>, EnvError> {
    let malformed = || EnvError::Malformed {
        text: text.to_string(),
    };
    let inner = text
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(malformed)?;

    let (name, default) = match inner.split_once(":-") {
        Some((name, default)) => (name.trim(), Some(default.trim())),
        None => (inner.trim(), None),
    };

    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(malformed());
    }
    Ok(EnvReference { name, default })
}

/// Substitutes environment references. No recursive expansion: a variable's
/// value is used verbatim even if it looks like another reference.
pub struct EnvExpander<'a> {
    source: &'a dyn VariableSource,
}

impl<'a> EnvExpander<'a> {
    pub fn new(source: &'a dyn VariableSource) -> Self {
        Self { source }
    }

    /// A set, non-empty variable wins; otherwise the default is used, with
    /// surrounding quotes removed and escapes decoded.
    pub fn expand(&self, text: &str) -> Result<String, EnvError> {
        let reference = parse_reference(text)?;
        if let Some(value) = self.source.lookup(reference.name) {
            if !value.is_empty() {
                return Ok(value);
            }
        }
        match reference.default {
            Some(default) => decode_default(default).ok_or_else(|| EnvError::Malformed {
                text: text.to_string(),
            }),
            None => Err(EnvError::MissingEnvVar {
                name: reference.name.to_string(),
            }),
        }
    }
}

pub fn expand(text: &str, source: &dyn VariableSource) -> Result<String, EnvError> {
    EnvExpander::new(source).expand(text)
}

fn decode_default(raw: &str) -> Option<String> {
    match raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(body) => crate::parser::unescape(body).ok(),
        None => Some(raw.to_string()),
    }
}
