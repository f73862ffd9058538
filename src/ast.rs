use indexmap::IndexMap;
use std::fmt;

/// Ordered field storage of an object body. Insertion order is source order.
pub type Fields = IndexMap<String, Value>;

/// A parsed CFG++ value. Trees own their children and are plain data.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Array(Vec<Value>),
    Object(Object),
    /// A bare, possibly namespaced symbol such as `production` or
    /// `Status::active`. Resolution against enum definitions is deferred to
    /// validation.
    EnumRef(String),
}

/// An object, optionally carrying a type name and constructor parameters.
#[derive(Debug, Clone, Default)]
pub struct Object {
    pub type_name: Option<String>,
    pub params: Vec<Param>,
    pub fields: Fields,
}

/// One constructor parameter: `type[] name = default`.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub type_name: String,
    pub is_array: bool,
    pub name: String,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnumDefinition {
    pub name: String,
    pub namespace: Option<String>,
    pub values: Vec<String>,
    pub default: Option<String>,
    /// Context key to the subset of values permitted under that context.
    pub constraints: IndexMap<String, Vec<String>>,
}

/// The result of parsing one source: its root value plus every enum
/// definition declared in it, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub root: Value,
    pub enums: Vec<EnumDefinition>,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::EnumRef(_) => "enum",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Double(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to doubles.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Strings and enum symbols both read as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::EnumRef(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|object| object.get(key))
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.as_array().and_then(|items| items.get(index))
    }

    /// Looks up a nested value by a dotted path with optional indices,
    /// e.g. `servers[0].host`. An empty path returns `self`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            let (key, mut indices) = match segment.find('[') {
                Some(i) => (&segment[..i], &segment[i..]),
                None => (segment, ""),
            };
            if !key.is_empty() {
                current = current.get(key)?;
            }
            while let Some(rest) = indices.strip_prefix('[') {
                let end = rest.find(']')?;
                let index: usize = rest[..end].trim().parse().ok()?;
                current = current.get_index(index)?;
                indices = &rest[end + 1..];
            }
            if !indices.is_empty() {
                return None;
            }
        }
        Some(current)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::render::render(self))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn typed(type_name: impl Into<String>) -> Self {
        Object {
            type_name: Some(type_name.into()),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Inserts or replaces a field. A replaced field keeps its original
    /// position; the previous value is returned.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Last `::` segment of the type name.
    pub fn short_type_name(&self) -> Option<&str> {
        self.type_name
            .as_deref()
            .map(|name| name.rsplit("::").next().unwrap_or(name))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// Field order is significant, so this cannot defer to IndexMap's equality.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name
            && self.params == other.params
            && self.fields.len() == other.fields.len()
            && self.fields.iter().eq(other.fields.iter())
    }
}

impl Param {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Param {
            type_name: type_name.into(),
            is_array: false,
            name: name.into(),
            default: None,
        }
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

impl EnumDefinition {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EnumDefinition {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_constraint<I, S>(mut self, context: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraints
            .insert(context.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}::{}", self.name),
            None => self.name.clone(),
        }
    }

    /// True if `name` is either the plain or the qualified name of this enum.
    pub fn is_named(&self, name: &str) -> bool {
        self.name == name || self.qualified_name() == name
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// Values permitted under `context`: the constraint subset registered for
    /// that key, or every value when there is none.
    pub fn permitted(&self, context: Option<&str>) -> &[String] {
        context
            .and_then(|key| self.constraints.get(key))
            .map_or(self.values.as_slice(), Vec::as_slice)
    }

    /// Checks the structural rules every enum must satisfy and returns a
    /// human-readable reason for the first violation.
    pub fn check(&self) -> Result<(), String> {
        if self.values.is_empty() {
            return Err("an enum needs at least one value".to_string());
        }
        for (i, value) in self.values.iter().enumerate() {
            if self.values[..i].contains(value) {
                return Err(format!("value '{value}' is declared twice"));
            }
        }
        if let Some(default) = &self.default {
            if !self.contains(default) {
                return Err(format!("default '{default}' is not one of the values"));
            }
        }
        for (context, subset) in &self.constraints {
            if subset.is_empty() {
                return Err(format!("constraint '{context}' permits no values"));
            }
            if let Some(unknown) = subset.iter().find(|v| !self.contains(v)) {
                return Err(format!(
                    "constraint '{context}' names '{unknown}', which is not one of the values"
                ));
            }
        }
        Ok(())
    }
}

impl Document {
    pub fn new(root: Value) -> Self {
        Document {
            root,
            enums: Vec::new(),
        }
    }

    pub fn find_enum(&self, name: &str) -> Option<&EnumDefinition> {
        self.enums.iter().find(|e| e.is_named(name))
    }

    /// Resolves an enum symbol. `Status::active` must name the enum and one
    /// of its values; a bare `active` resolves to the first enum declaring it.
    pub fn resolve_enum_ref(&self, symbol: &str) -> Option<&EnumDefinition> {
        match symbol.rsplit_once("::") {
            Some((prefix, member)) => self
                .find_enum(prefix)
                .filter(|definition| definition.contains(member)),
            None => self.enums.iter().find(|e| e.contains(symbol)),
        }
    }
}
