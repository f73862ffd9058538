use miette::{Diagnostic, NamedSource, SourceSpan};
use serde::Serialize;
use thiserror::Error;

/// Top-level error for every fallible operation of the engine.
///
/// Structural errors (lexing, parsing, includes, binary decoding) abort the
/// operation with no partial result. Validation problems are not part of this
/// type; they are collected as [`ValidationError`] lists instead.
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CfgError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Include(#[from] IncludeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaSyntaxError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Binary(#[from] BinaryError),

    #[error("Input too large: {size} bytes exceeds the configured limit of {limit} bytes")]
    #[diagnostic(
        code(cfgpp::input_too_large),
        help("Raise `max_input_size` in the parser options or split the document.")
    )]
    InputTooLarge { size: usize, limit: usize },

    #[error("I/O error reading '{path}': {message}")]
    #[diagnostic(code(cfgpp::io))]
    Io { path: String, message: String },
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum LexError {
    #[error("Unexpected character '{ch}' at line {line}, column {column}")]
    #[diagnostic(
        code(lexer::unexpected_character),
        help("This character does not start any CFG++ token.")
    )]
    UnexpectedCharacter {
        ch: char,
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("not recognized")]
        span: SourceSpan,
    },

    #[error("Unterminated string starting at line {line}, column {column}")]
    #[diagnostic(code(lexer::unterminated_string), help("Add the closing '\"'."))]
    UnterminatedString {
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("string starts here")]
        span: SourceSpan,
    },

    #[error("Unterminated block comment starting at line {line}, column {column}")]
    #[diagnostic(code(lexer::unterminated_comment), help("Close the comment with '*/'."))]
    UnterminatedComment {
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("comment starts here")]
        span: SourceSpan,
    },

    #[error("Malformed environment reference at line {line}, column {column}")]
    #[diagnostic(
        code(lexer::unterminated_env_var),
        help("Use `${{NAME}}` or `${{NAME:-default}}`.")
    )]
    UnterminatedEnvVar {
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("reference starts here")]
        span: SourceSpan,
    },

    #[error("Unknown directive '{directive}' at line {line}, column {column}")]
    #[diagnostic(
        code(lexer::unknown_directive),
        help("Only `@include` and `@import` are supported.")
    )]
    UnknownDirective {
        directive: String,
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("unknown directive")]
        span: SourceSpan,
    },
}

impl LexError {
    pub fn line(&self) -> usize {
        match self {
            LexError::UnexpectedCharacter { line, .. }
            | LexError::UnterminatedString { line, .. }
            | LexError::UnterminatedComment { line, .. }
            | LexError::UnterminatedEnvVar { line, .. }
            | LexError::UnknownDirective { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            LexError::UnexpectedCharacter { column, .. }
            | LexError::UnterminatedString { column, .. }
            | LexError::UnterminatedComment { column, .. }
            | LexError::UnterminatedEnvVar { column, .. }
            | LexError::UnknownDirective { column, .. } => *column,
        }
    }
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ParseError {
    #[error("Unexpected token '{found}' at line {line}, column {column}: expected {expected}")]
    #[diagnostic(
        code(parser::unexpected_token),
        help("The parser found a token it did not expect in this position.")
    )]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("Expected {expected}, but found this")]
        span: SourceSpan,
    },

    #[error("Unexpected end of file at line {line}, column {column}: expected {expected}")]
    #[diagnostic(
        code(parser::unexpected_eof),
        help("The file ended unexpectedly. The parser expected more tokens.")
    )]
    UnexpectedEof {
        expected: String,
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("File ended unexpectedly here")]
        span: SourceSpan,
    },

    #[error("Invalid number literal '{text}' at line {line}, column {column}")]
    #[diagnostic(
        code(parser::invalid_number),
        help("Integers must fit in a signed 64-bit value.")
    )]
    InvalidNumber {
        text: String,
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("not a valid number")]
        span: SourceSpan,
    },

    #[error("Invalid escape sequence '{sequence}' at line {line}, column {column}")]
    #[diagnostic(code(parser::invalid_escape))]
    InvalidEscape {
        sequence: String,
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("in this string")]
        span: SourceSpan,
    },

    #[error("Duplicate parameter '{name}' at line {line}, column {column}")]
    #[diagnostic(
        code(parser::duplicate_parameter),
        help("Parameter names must be unique within one constructor.")
    )]
    DuplicateParameter {
        name: String,
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("declared again here")]
        span: SourceSpan,
    },

    #[error("Nesting deeper than {limit} levels at line {line}, column {column}")]
    #[diagnostic(
        code(parser::nesting_too_deep),
        help("Flatten the document or raise `max_nesting_depth` in the parser options.")
    )]
    NestingTooDeep {
        limit: usize,
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("this opens one level too many")]
        span: SourceSpan,
    },

    #[error("Invalid enum definition '{name}' at line {line}, column {column}: {reason}")]
    #[diagnostic(code(parser::invalid_enum))]
    InvalidEnum {
        name: String,
        reason: String,
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("defined here")]
        span: SourceSpan,
    },
}

impl ParseError {
    pub fn line(&self) -> usize {
        match self {
            ParseError::UnexpectedToken { line, .. }
            | ParseError::UnexpectedEof { line, .. }
            | ParseError::InvalidNumber { line, .. }
            | ParseError::InvalidEscape { line, .. }
            | ParseError::DuplicateParameter { line, .. }
            | ParseError::NestingTooDeep { line, .. }
            | ParseError::InvalidEnum { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            ParseError::UnexpectedToken { column, .. }
            | ParseError::UnexpectedEof { column, .. }
            | ParseError::InvalidNumber { column, .. }
            | ParseError::InvalidEscape { column, .. }
            | ParseError::DuplicateParameter { column, .. }
            | ParseError::NestingTooDeep { column, .. }
            | ParseError::InvalidEnum { column, .. } => *column,
        }
    }
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum IncludeError {
    #[error("Circular include detected: {}", .chain.join(" -> "))]
    #[diagnostic(
        code(include::circular),
        help("Break the cycle by moving shared content into a file that includes nothing back.")
    )]
    CircularInclude { chain: Vec<String> },

    #[error("Included file '{path}' not found (line {line}, column {column})")]
    #[diagnostic(
        code(include::not_found),
        help("Paths are resolved against the including file, then each include path in order.")
    )]
    IncludeNotFound {
        path: String,
        line: usize,
        column: usize,
        #[source_code]
        src: NamedSource<String>,
        #[label("included here")]
        span: SourceSpan,
    },

    #[error("Maximum include depth of {limit} exceeded while including '{path}'")]
    #[diagnostic(code(include::max_depth))]
    MaxIncludeDepthExceeded {
        path: String,
        depth: usize,
        limit: usize,
    },

    #[error("Include directives are disabled (line {line}, column {column})")]
    #[diagnostic(code(include::disabled))]
    Disabled { line: usize, column: usize },

    #[error("Failed to read included file '{path}': {message}")]
    #[diagnostic(code(include::io))]
    Io { path: String, message: String },
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("Environment variable '{name}' is not set and has no default")]
    #[diagnostic(
        code(env::missing),
        help("Set the variable or provide a default with `${{NAME:-default}}`.")
    )]
    MissingEnvVar { name: String },

    #[error("Malformed environment reference '{text}'")]
    #[diagnostic(code(env::malformed))]
    Malformed { text: String },
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum SchemaSyntaxError {
    #[error("Schema syntax error at line {line}: {message}")]
    #[diagnostic(code(schema::syntax))]
    Malformed { message: String, line: usize },

    #[error("Unresolved type '{type_name}' for field '{field}' of '{object}' (line {line})")]
    #[diagnostic(
        code(schema::unresolved_type),
        help("Declare the enum or object schema, or use a primitive type.")
    )]
    UnresolvedType {
        type_name: String,
        object: String,
        field: String,
        line: usize,
    },

    #[error("Duplicate definition '{name}' at line {line}")]
    #[diagnostic(code(schema::duplicate))]
    Duplicate { name: String, line: usize },

    #[error("Failed to read schema '{path}': {message}")]
    #[diagnostic(code(schema::io))]
    Io { path: String, message: String },
}

impl SchemaSyntaxError {
    pub fn line(&self) -> Option<usize> {
        match self {
            SchemaSyntaxError::Malformed { line, .. }
            | SchemaSyntaxError::UnresolvedType { line, .. }
            | SchemaSyntaxError::Duplicate { line, .. } => Some(*line),
            SchemaSyntaxError::Io { .. } => None,
        }
    }
}

/// Output buffer sizing failure, kept apart from content errors so callers
/// can retry with a larger buffer without reparsing.
#[derive(Error, Debug, Diagnostic, Clone, Copy, PartialEq, Eq)]
#[error("Buffer too small: {required} bytes required, {available} available")]
#[diagnostic(code(cfgpp::buffer_too_small))]
pub struct BufferTooSmall {
    pub required: usize,
    pub available: usize,
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum BinaryError {
    #[error("Truncated record at offset {offset}: {needed} bytes needed, {available} available")]
    #[diagnostic(code(binary::truncated))]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Truncated cluster: buffer exhausted after {decoded} of {expected} fields")]
    #[diagnostic(code(binary::truncated_cluster))]
    TruncatedCluster { decoded: usize, expected: usize },

    #[error("Unknown type code {code} at offset {offset}")]
    #[diagnostic(code(binary::unknown_type))]
    UnknownTypeCode { code: u32, offset: usize },

    #[error("Payload of {type_name} at offset {offset} is {actual} bytes, expected at least {expected}")]
    #[diagnostic(code(binary::payload_size))]
    PayloadSize {
        type_name: &'static str,
        offset: usize,
        expected: usize,
        actual: usize,
    },

    #[error("String payload at offset {offset} is not valid UTF-8")]
    #[diagnostic(code(binary::invalid_utf8))]
    InvalidUtf8 { offset: usize },

    #[error("Unsigned value {value} at offset {offset} does not fit in a signed 64-bit integer")]
    #[diagnostic(code(binary::integer_overflow))]
    IntegerOverflow { value: u64, offset: usize },

    #[error("Nested aggregate record at offset {offset}; only scalars may appear inside clusters and arrays")]
    #[diagnostic(code(binary::nested_aggregate))]
    NestedAggregate { offset: usize },

    #[error("Cannot encode nested container at '{path}'; only scalars and flat clusters map onto records")]
    #[diagnostic(code(binary::nested_container))]
    NestedContainer { path: String },

    #[error("Payload of {size} bytes exceeds the 32-bit record size field")]
    #[diagnostic(code(binary::payload_too_large))]
    PayloadTooLarge { size: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    BufferTooSmall(#[from] BufferTooSmall),
}

impl BinaryError {
    /// True for the errors caused by running out of input bytes.
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            BinaryError::Truncated { .. } | BinaryError::TruncatedCluster { .. }
        )
    }
}

/// A single schema violation. Validation collects every violation in a document
/// instead of stopping at the first one.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum ValidationError {
    #[error("Missing required field '{field}' at '{path}'")]
    MissingField { path: String, field: String },

    #[error("Type mismatch for field '{field}' at '{path}': expected {expected}, found {actual}")]
    TypeMismatch {
        path: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid value '{value}' for enum {enum_name} at '{path}': expected one of {}", .allowed.join(", "))]
    InvalidEnumValue {
        path: String,
        field: String,
        enum_name: String,
        value: String,
        allowed: Vec<String>,
    },
}

impl ValidationError {
    pub fn path(&self) -> &str {
        match self {
            ValidationError::MissingField { path, .. }
            | ValidationError::TypeMismatch { path, .. }
            | ValidationError::InvalidEnumValue { path, .. } => path,
        }
    }
}

/// Flat error description for hosts that cannot consume Rust error types
/// (command-line tools, editors, foreign bindings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl From<&ValidationError> for ErrorReport {
    fn from(error: &ValidationError) -> Self {
        let kind = match error {
            ValidationError::MissingField { .. } => "MissingFieldError",
            ValidationError::TypeMismatch { .. } => "TypeMismatchError",
            ValidationError::InvalidEnumValue { .. } => "InvalidEnumValueError",
        };
        ErrorReport {
            kind,
            message: error.to_string(),
            line: None,
            column: None,
        }
    }
}

impl CfgError {
    pub fn kind(&self) -> &'static str {
        match self {
            CfgError::Lex(_) => "LexError",
            CfgError::Parse(_) => "ParseError",
            CfgError::Include(IncludeError::CircularInclude { .. }) => "CircularIncludeError",
            CfgError::Include(IncludeError::MaxIncludeDepthExceeded { .. }) => {
                "MaxIncludeDepthExceeded"
            }
            CfgError::Include(_) => "IncludeError",
            CfgError::Env(EnvError::MissingEnvVar { .. }) => "MissingEnvVarError",
            CfgError::Env(_) => "EnvError",
            CfgError::Schema(_) => "SchemaSyntaxError",
            CfgError::Binary(BinaryError::BufferTooSmall(_)) => "BufferTooSmallError",
            CfgError::Binary(_) => "BinaryDecodeError",
            CfgError::InputTooLarge { .. } => "InputTooLarge",
            CfgError::Io { .. } => "IoError",
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            CfgError::Lex(e) => Some(e.line()),
            CfgError::Parse(e) => Some(e.line()),
            CfgError::Include(IncludeError::IncludeNotFound { line, .. })
            | CfgError::Include(IncludeError::Disabled { line, .. }) => Some(*line),
            CfgError::Schema(e) => e.line(),
            _ => None,
        }
    }

    pub fn column(&self) -> Option<usize> {
        match self {
            CfgError::Lex(e) => Some(e.column()),
            CfgError::Parse(e) => Some(e.column()),
            CfgError::Include(IncludeError::IncludeNotFound { column, .. })
            | CfgError::Include(IncludeError::Disabled { column, .. }) => Some(*column),
            _ => None,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            line: self.line(),
            column: self.column(),
        }
    }
}

impl From<BufferTooSmall> for CfgError {
    fn from(error: BufferTooSmall) -> Self {
        CfgError::Binary(BinaryError::BufferTooSmall(error))
    }
}
