use crate::ast::EnumDefinition;
use crate::error::SchemaSyntaxError;
use indexmap::IndexMap;
use std::fmt;
use std::path::Path;

/// A field type in the schema language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Null,
    Boolean,
    Integer,
    Double,
    /// Integer or double.
    Number,
    String,
    Any,
    /// Any object, checked structurally if it names a schema.
    Object,
    Array(Box<TypeRef>),
    Optional(Box<TypeRef>),
    /// `a | b`: the first alternative that accepts the value wins.
    Union(Vec<TypeRef>),
    /// An enum or object schema declared elsewhere in the same schema.
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: TypeRef,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSchema {
    pub name: String,
    pub fields: IndexMap<String, FieldSpec>,
}

/// A set of enum definitions and object schemas, in declaration order.
///
/// Immutable once built, so it can be shared between threads and used for
/// any number of validations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    enums: IndexMap<String, EnumDefinition>,
    objects: IndexMap<String, ObjectSchema>,
}

impl TypeRef {
    pub fn parse(text: &str) -> Result<TypeRef, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("missing type".to_string());
        }

        let alternatives = split_top_level(text, '|');
        if alternatives.len() > 1 {
            return alternatives
                .into_iter()
                .map(TypeRef::parse)
                .collect::<Result<Vec<_>, _>>()
                .map(TypeRef::Union);
        }

        if let Some(inner) = text.strip_suffix("[]") {
            return Ok(TypeRef::Array(Box::new(TypeRef::parse(inner)?)));
        }
        if let Some(inner) = text.strip_suffix('?') {
            return Ok(TypeRef::Optional(Box::new(TypeRef::parse(inner)?)));
        }
        if let Some(inner) = generic_argument(text, "array") {
            return Ok(TypeRef::Array(Box::new(TypeRef::parse(inner)?)));
        }
        if let Some(inner) = generic_argument(text, "optional") {
            return Ok(TypeRef::Optional(Box::new(TypeRef::parse(inner)?)));
        }

        Ok(match text {
            "null" => TypeRef::Null,
            "boolean" | "bool" => TypeRef::Boolean,
            "integer" | "int" => TypeRef::Integer,
            "double" | "float" => TypeRef::Double,
            "number" => TypeRef::Number,
            "string" => TypeRef::String,
            "any" => TypeRef::Any,
            "object" => TypeRef::Object,
            "array" => TypeRef::Array(Box::new(TypeRef::Any)),
            name if is_namespaced_name(name) => TypeRef::Named(name.to_string()),
            other => return Err(format!("invalid type '{other}'")),
        })
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, TypeRef::Optional(_))
    }

    /// Every named type this type refers to, directly or nested.
    pub fn named_types(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_named(&mut names);
        names
    }

    fn collect_named<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            TypeRef::Named(name) => names.push(name),
            TypeRef::Array(inner) | TypeRef::Optional(inner) => inner.collect_named(names),
            TypeRef::Union(alternatives) => {
                for alternative in alternatives {
                    alternative.collect_named(names);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Null => f.write_str("null"),
            TypeRef::Boolean => f.write_str("boolean"),
            TypeRef::Integer => f.write_str("integer"),
            TypeRef::Double => f.write_str("double"),
            TypeRef::Number => f.write_str("number"),
            TypeRef::String => f.write_str("string"),
            TypeRef::Any => f.write_str("any"),
            TypeRef::Object => f.write_str("object"),
            TypeRef::Array(inner) => write!(f, "array<{inner}>"),
            TypeRef::Optional(inner) => write!(f, "optional<{inner}>"),
            TypeRef::Union(alternatives) => {
                for (i, alternative) in alternatives.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{alternative}")?;
                }
                Ok(())
            }
            TypeRef::Named(name) => f.write_str(name),
        }
    }
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        let required = !ty.is_optional();
        FieldSpec {
            name: name.into(),
            ty,
            required,
        }
    }
}

impl ObjectSchema {
    pub fn new(name: impl Into<String>) -> Self {
        ObjectSchema {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        let spec = FieldSpec::new(name, ty);
        self.fields.insert(spec.name.clone(), spec);
        self
    }

    pub fn optional_field(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        let mut spec = FieldSpec::new(name, ty);
        spec.required = false;
        self.fields.insert(spec.name.clone(), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn short_name(&self) -> &str {
        last_segment(&self.name)
    }

    /// True if a value's type name selects this schema, by full name or by
    /// last segment.
    pub fn answers_to(&self, type_name: &str) -> bool {
        self.name == type_name || self.short_name() == last_segment(type_name)
    }
}

impl fmt::Display for ObjectSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {{", self.name)?;
        for field in self.fields.values() {
            let marker = if field.required || field.ty.is_optional() {
                ""
            } else {
                "?"
            };
            writeln!(f, "    {}{}: {};", field.name, marker, field.ty)?;
        }
        writeln!(f, "}}")
    }
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the line-oriented schema language:
    ///
    /// ```text
    /// enum Status { active, inactive }
    /// enum Level {
    ///     debug, info, warn, error
    ///     when production: warn, error
    /// }
    /// Server {
    ///     host: string;
    ///     port: integer;
    ///     replicas?: integer;
    ///     status: Status;
    /// }
    /// ```
    pub fn parse(text: &str) -> Result<Schema, SchemaSyntaxError> {
        let mut parser = SchemaParser::default();
        for (index, line) in text.lines().enumerate() {
            parser.feed(index + 1, line)?;
        }
        parser.finish()
    }

    pub fn parse_file(path: impl AsRef<Path>) -> Result<Schema, SchemaSyntaxError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SchemaSyntaxError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Schema::parse(&text)
    }

    pub fn add_enum(&mut self, definition: EnumDefinition) {
        self.enums.insert(definition.qualified_name(), definition);
    }

    pub fn add_object(&mut self, object: ObjectSchema) {
        self.objects.insert(object.name.clone(), object);
    }

    pub fn with_enum(mut self, definition: EnumDefinition) -> Self {
        self.add_enum(definition);
        self
    }

    pub fn with_object(mut self, object: ObjectSchema) -> Self {
        self.add_object(object);
        self
    }

    pub fn enums(&self) -> impl Iterator<Item = &EnumDefinition> {
        self.enums.values()
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectSchema> {
        self.objects.values()
    }

    pub fn is_empty(&self) -> bool {
        self.enums.is_empty() && self.objects.is_empty()
    }

    /// Looks an enum up by qualified name, then by plain name.
    pub fn enum_def(&self, name: &str) -> Option<&EnumDefinition> {
        self.enums
            .get(name)
            .or_else(|| self.enums.values().find(|e| e.name == name))
    }

    /// Looks an object schema up by full name, then by last segment.
    pub fn object(&self, name: &str) -> Option<&ObjectSchema> {
        self.objects
            .get(name)
            .or_else(|| self.objects.values().find(|o| o.answers_to(name)))
    }

    /// Checks that every named field type resolves. `Schema::parse` does this
    /// itself; schemas assembled by hand can call it once built.
    pub fn check_references(&self) -> Result<(), SchemaSyntaxError> {
        for object in self.objects.values() {
            for field in object.fields.values() {
                if let Some(missing) = field
                    .ty
                    .named_types()
                    .into_iter()
                    .find(|name| !self.resolves(name))
                {
                    return Err(SchemaSyntaxError::UnresolvedType {
                        type_name: missing.to_string(),
                        object: object.name.clone(),
                        field: field.name.clone(),
                        line: 0,
                    });
                }
            }
        }
        Ok(())
    }

    fn resolves(&self, name: &str) -> bool {
        self.enum_def(name).is_some() || self.object(name).is_some()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for definition in self.enums.values() {
            if !first {
                writeln!(f)?;
            }
            first = false;
            writeln!(f, "enum {} {{", definition.qualified_name())?;
            writeln!(f, "    {}", definition.values.join(", "))?;
            if let Some(default) = &definition.default {
                writeln!(f, "    default: {default}")?;
            }
            for (context, subset) in &definition.constraints {
                writeln!(f, "    when {context}: {}", subset.join(", "))?;
            }
            writeln!(f, "}}")?;
        }
        for object in self.objects.values() {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "{object}")?;
        }
        Ok(())
    }
}

enum Block {
    Enum {
        definition: EnumDefinition,
        line: usize,
    },
    Object {
        schema: ObjectSchema,
        line: usize,
    },
}

struct FieldReference {
    object: String,
    field: String,
    type_name: String,
    line: usize,
}

#[derive(Default)]
struct SchemaParser {
    schema: Schema,
    block: Option<Block>,
    references: Vec<FieldReference>,
}

impl SchemaParser {
    fn feed(&mut self, line: usize, raw: &str) -> Result<(), SchemaSyntaxError> {
        let mut rest = strip_comment(raw).trim();
        while !rest.is_empty() {
            match self.block.take() {
                None => {
                    let brace = rest.find('{').ok_or_else(|| {
                        malformed(line, format!("expected a definition, found '{rest}'"))
                    })?;
                    let block = self.open_block(rest[..brace].trim(), line)?;
                    self.block = Some(block);
                    rest = rest[brace + 1..].trim_start();
                }
                Some(block) => {
                    let (body, closed, after) = match rest.find('}') {
                        Some(i) => (&rest[..i], true, &rest[i + 1..]),
                        None => (rest, false, ""),
                    };
                    let block = self.feed_body(block, body, line)?;
                    if closed {
                        self.close_block(block)?;
                    } else {
                        self.block = Some(block);
                    }
                    let after = after.trim_start();
                    rest = after.strip_prefix(';').unwrap_or(after).trim_start();
                }
            }
        }
        Ok(())
    }

    fn open_block(&self, head: &str, line: usize) -> Result<Block, SchemaSyntaxError> {
        let (keyword, name) = match head.split_once(char::is_whitespace) {
            Some((keyword, name)) if keyword == "enum" || keyword == "schema" => {
                (keyword, name.trim())
            }
            _ => ("", head),
        };
        if !is_namespaced_name(name) {
            return Err(malformed(line, format!("invalid definition name '{name}'")));
        }
        if self.schema.enums.contains_key(name) || self.schema.objects.contains_key(name) {
            return Err(SchemaSyntaxError::Duplicate {
                name: name.to_string(),
                line,
            });
        }

        if keyword == "enum" {
            let (namespace, short) = match name.rsplit_once("::") {
                Some((namespace, short)) => (Some(namespace.to_string()), short.to_string()),
                None => (None, name.to_string()),
            };
            Ok(Block::Enum {
                definition: EnumDefinition {
                    name: short,
                    namespace,
                    ..EnumDefinition::default()
                },
                line,
            })
        } else {
            Ok(Block::Object {
                schema: ObjectSchema::new(name),
                line,
            })
        }
    }

    fn feed_body(
        &mut self,
        block: Block,
        body: &str,
        line: usize,
    ) -> Result<Block, SchemaSyntaxError> {
        let body = body.trim();
        if body.is_empty() {
            return Ok(block);
        }
        match block {
            Block::Enum {
                mut definition,
                line: start,
            } => {
                if let Some(rule) = body.strip_prefix("when ") {
                    let (context, values) = rule.split_once(':').ok_or_else(|| {
                        malformed(line, "expected 'when <context>: <values>'".to_string())
                    })?;
                    let context = context.trim();
                    if !is_identifier(context) {
                        return Err(malformed(line, format!("invalid context name '{context}'")));
                    }
                    let subset = symbols(values, line)?;
                    definition.constraints.insert(context.to_string(), subset);
                } else if let Some(value) = body
                    .strip_prefix("default")
                    .and_then(|rest| rest.trim_start().strip_prefix([':', '=']))
                {
                    let mut value = symbols(value, line)?;
                    if value.len() != 1 {
                        return Err(malformed(line, "expected a single default value".to_string()));
                    }
                    definition.default = value.pop();
                } else {
                    definition.values.extend(symbols(body, line)?);
                }
                Ok(Block::Enum {
                    definition,
                    line: start,
                })
            }
            Block::Object {
                mut schema,
                line: start,
            } => {
                for entry in body.split(';').map(str::trim).filter(|e| !e.is_empty()) {
                    let field = self.parse_field(&schema.name, entry, line)?;
                    if schema.fields.contains_key(&field.name) {
                        return Err(SchemaSyntaxError::Duplicate {
                            name: format!("{}.{}", schema.name, field.name),
                            line,
                        });
                    }
                    schema.fields.insert(field.name.clone(), field);
                }
                Ok(Block::Object {
                    schema,
                    line: start,
                })
            }
        }
    }

    fn parse_field(
        &mut self,
        object: &str,
        entry: &str,
        line: usize,
    ) -> Result<FieldSpec, SchemaSyntaxError> {
        let (name, ty) = entry
            .split_once(':')
            .ok_or_else(|| malformed(line, format!("expected 'name: type', found '{entry}'")))?;
        let name = name.trim();
        let (name, optional) = match name.strip_suffix('?') {
            Some(name) => (name.trim_end(), true),
            None => (name, false),
        };
        if !is_identifier(name) {
            return Err(malformed(line, format!("invalid field name '{name}'")));
        }
        let ty = TypeRef::parse(ty).map_err(|message| malformed(line, message))?;
        for type_name in ty.named_types() {
            self.references.push(FieldReference {
                object: object.to_string(),
                field: name.to_string(),
                type_name: type_name.to_string(),
                line,
            });
        }
        let required = !optional && !ty.is_optional();
        Ok(FieldSpec {
            name: name.to_string(),
            ty,
            required,
        })
    }

    fn close_block(&mut self, block: Block) -> Result<(), SchemaSyntaxError> {
        match block {
            Block::Enum { definition, line } => {
                definition.check().map_err(|reason| {
                    malformed(
                        line,
                        format!("enum '{}': {reason}", definition.qualified_name()),
                    )
                })?;
                self.schema.add_enum(definition);
            }
            Block::Object { schema, .. } => self.schema.add_object(schema),
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Schema, SchemaSyntaxError> {
        if let Some(block) = self.block.take() {
            let (name, line) = match &block {
                Block::Enum { definition, line } => (definition.qualified_name(), *line),
                Block::Object { schema, line } => (schema.name.clone(), *line),
            };
            return Err(malformed(line, format!("block '{name}' is never closed")));
        }
        for reference in &self.references {
            if !self.schema.resolves(&reference.type_name) {
                return Err(SchemaSyntaxError::UnresolvedType {
                    type_name: reference.type_name.clone(),
                    object: reference.object.clone(),
                    field: reference.field.clone(),
                    line: reference.line,
                });
            }
        }
        log::debug!(
            "schema loaded: {} enums, {} object schemas",
            self.schema.enums.len(),
            self.schema.objects.len()
        );
        Ok(self.schema)
    }
}

fn malformed(line: usize, message: String) -> SchemaSyntaxError {
    SchemaSyntaxError::Malformed { message, line }
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find("//") {
        Some(i) => &line[..i],
        None => line,
    }
}

/// Comma separated enum symbols; quotes around a symbol are optional.
fn symbols(text: &str, line: usize) -> Result<Vec<String>, SchemaSyntaxError> {
    let mut out = Vec::new();
    for item in text.split([',', ';']).map(str::trim).filter(|i| !i.is_empty()) {
        let symbol = item
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(item);
        if symbol.is_empty() || symbol.chars().any(char::is_whitespace) {
            return Err(malformed(line, format!("invalid enum value '{item}'")));
        }
        out.push(symbol.to_string());
    }
    Ok(out)
}

fn generic_argument<'a>(text: &'a str, head: &str) -> Option<&'a str> {
    text.strip_prefix(head)?
        .trim_start()
        .strip_prefix('<')?
        .strip_suffix('>')
}

fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn last_segment(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name)
}

pub(crate) fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_namespaced_name(text: &str) -> bool {
    text.split("::").all(is_identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_SCHEMA: &str = r#"
// Service description
enum Status { active, inactive, pending }

enum Level {
    debug, info,
    warn, error
    default: info
    when production: warn, error
}

# Objects
schema Server {
    host: string;
    port: integer;
    tags: array<string>;
    aliases: string[];
    replicas?: integer;
    backup: optional<Server>;
    status: Status;
}

Database::PostgreSQL { url: string; pool: int | null; }
"#;

    #[test]
    fn test_parse_full_schema() {
        let schema = Schema::parse(SERVER_SCHEMA).unwrap();

        let status = schema.enum_def("Status").unwrap();
        assert_eq!(status.values, vec!["active", "inactive", "pending"]);

        let level = schema.enum_def("Level").unwrap();
        assert_eq!(level.values.len(), 4);
        assert_eq!(level.default.as_deref(), Some("info"));
        assert_eq!(level.permitted(Some("production")), ["warn", "error"]);

        let server = schema.object("Server").unwrap();
        let names: Vec<&str> = server.fields.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["host", "port", "tags", "aliases", "replicas", "backup", "status"]
        );
        assert_eq!(server.get("tags").unwrap().ty, TypeRef::Array(Box::new(TypeRef::String)));
        assert_eq!(server.get("aliases").unwrap().ty, server.get("tags").unwrap().ty);
        assert!(!server.get("replicas").unwrap().required);
        assert!(!server.get("backup").unwrap().required);
        assert!(server.get("status").unwrap().required);

        let postgres = schema.object("PostgreSQL").unwrap();
        assert_eq!(postgres.name, "Database::PostgreSQL");
        assert_eq!(
            postgres.get("pool").unwrap().ty,
            TypeRef::Union(vec![TypeRef::Integer, TypeRef::Null])
        );
    }

    #[test]
    fn test_lookup_by_last_segment() {
        let schema = Schema::parse("Database::PostgreSQL { url: string; }").unwrap();
        assert!(schema.object("Database::PostgreSQL").is_some());
        assert!(schema.object("PostgreSQL").is_some());
        assert!(schema.object("Other::PostgreSQL").is_some());
        assert!(schema.object("MySQL").is_none());
    }

    #[test]
    fn test_unresolved_type_reports_line() {
        let err = Schema::parse("Server {\n    host: string;\n    mode: Mode;\n}").unwrap_err();
        assert_eq!(
            err,
            SchemaSyntaxError::UnresolvedType {
                type_name: "Mode".to_string(),
                object: "Server".to_string(),
                field: "mode".to_string(),
                line: 3,
            }
        );
    }

    #[test]
    fn test_forward_references_resolve() {
        let schema = Schema::parse("A { b: B; }\nB { x: int; }").unwrap();
        assert_eq!(
            schema.object("A").unwrap().get("b").unwrap().ty,
            TypeRef::Named("B".to_string())
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            Schema::parse("Server {\n host string;\n}"),
            Err(SchemaSyntaxError::Malformed { line: 2, .. })
        ));
        assert!(matches!(
            Schema::parse("Server {\n host: string;\n"),
            Err(SchemaSyntaxError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            Schema::parse("just words"),
            Err(SchemaSyntaxError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            Schema::parse("A { x: int; }\nA { y: int; }"),
            Err(SchemaSyntaxError::Duplicate { line: 2, .. })
        ));
        assert!(matches!(
            Schema::parse("A { x: int; x: string; }"),
            Err(SchemaSyntaxError::Duplicate { .. })
        ));
        assert!(matches!(
            Schema::parse("enum E { a, b\n when prod: c\n}"),
            Err(SchemaSyntaxError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            Schema::parse("A { x: array<; }"),
            Err(SchemaSyntaxError::Malformed { .. })
        ));
    }

    #[test]
    fn test_type_parse_and_display() {
        let ty = TypeRef::parse("array<optional<Net::Endpoint>>").unwrap();
        assert_eq!(ty.to_string(), "array<optional<Net::Endpoint>>");
        assert_eq!(ty.named_types(), vec!["Net::Endpoint"]);
        assert_eq!(TypeRef::parse("bool").unwrap(), TypeRef::Boolean);
        assert_eq!(TypeRef::parse("float").unwrap(), TypeRef::Double);
        assert_eq!(TypeRef::parse("int?").unwrap().to_string(), "optional<integer>");
        assert!(TypeRef::parse("9lives").is_err());
    }

    #[test]
    fn test_display_parses_back() {
        let schema = Schema::parse(SERVER_SCHEMA).unwrap();
        let text = schema.to_string();
        assert_eq!(Schema::parse(&text).unwrap(), schema);
    }

    #[test]
    fn test_builder_reference_check() {
        let schema = Schema::new()
            .with_object(ObjectSchema::new("A").field("b", TypeRef::Named("B".into())));
        assert!(matches!(
            schema.check_references(),
            Err(SchemaSyntaxError::UnresolvedType { line: 0, .. })
        ));
        let schema = schema.with_enum(EnumDefinition::new("B", ["x"]));
        assert!(schema.check_references().is_ok());
    }
}
