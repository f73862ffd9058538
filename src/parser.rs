use crate::ast::{Document, EnumDefinition, Object, Param, Value};
use crate::env::{EnvExpander, ProcessEnv, VariableSource};
use crate::error::{CfgError, ParseError};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::resolver::{IncludeResolver, SourceMap};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Knobs for one parser. Loadable from JSON or YAML; missing keys take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    /// Directories searched, in order, after the including file's directory.
    pub include_paths: Vec<PathBuf>,
    pub validation_enabled: bool,
    pub max_include_depth: usize,
    /// Deepest allowed stack of objects and arrays.
    pub max_nesting_depth: usize,
    /// Total bytes across the root text and every included file.
    pub max_input_size: Option<usize>,
    pub expand_env_vars: bool,
    pub process_includes: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        ParserOptions {
            include_paths: vec![PathBuf::from(".")],
            validation_enabled: true,
            max_include_depth: 16,
            max_nesting_depth: 128,
            max_input_size: None,
            expand_env_vars: true,
            process_includes: true,
        }
    }
}

impl ParserOptions {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    pub fn with_max_input_size(mut self, bytes: usize) -> Self {
        self.max_input_size = Some(bytes);
        self
    }

    pub fn with_env_expansion(mut self, enabled: bool) -> Self {
        self.expand_env_vars = enabled;
        self
    }

    pub fn with_includes(mut self, enabled: bool) -> Self {
        self.process_includes = enabled;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation_enabled = enabled;
        self
    }
}

/// A recursive descent parser for CFG++.
///
/// The parser itself is immutable configuration; every call builds its own
/// token stream, include stack and position, so one parser can be shared
/// between threads.
#[derive(Clone)]
pub struct Parser {
    options: ParserOptions,
    variables: Arc<dyn VariableSource>,
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::with_options(ParserOptions::default())
    }

    pub fn with_options(options: ParserOptions) -> Self {
        Parser {
            options,
            variables: Arc::new(ProcessEnv),
        }
    }

    /// Replaces the process environment as the source of `${NAME}` values.
    pub fn with_variables(mut self, variables: impl VariableSource + 'static) -> Self {
        self.variables = Arc::new(variables);
        self
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Parses `text`. `name` labels diagnostics and, when it is a path, anchors
    /// relative includes at its directory.
    pub fn parse_str(&self, text: &str, name: &str) -> Result<Document, CfgError> {
        let mut resolver = IncludeResolver::new(&self.options);
        let source = resolver.register_source(name, text)?;
        let path = Path::new(name);
        resolver.enter_root(path);
        let base_dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());

        let tokens = Lexer::with_name(text, name, source).tokenize()?;
        let tokens = resolver.expand(tokens, base_dir)?;
        let sources = resolver.into_sources();
        ParseContext::new(tokens, &sources, &self.options, self.variables.as_ref()).parse_document()
    }

    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<Document, CfgError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CfgError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.parse_str(&text, &path.display().to_string())
    }

    /// Parses several files and merges their root objects in order; later
    /// files override earlier fields. Non-object roots are skipped.
    pub fn parse_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Document, CfgError> {
        let mut merged = Object::new();
        let mut enums = Vec::new();
        for path in paths {
            let document = self.parse_file(path)?;
            if let Value::Object(object) = document.root {
                if merged.type_name.is_none() {
                    merged.type_name = object.type_name;
                }
                merged.fields.extend(object.fields);
            }
            enums.extend(document.enums);
        }
        Ok(Document {
            root: Value::Object(merged),
            enums,
        })
    }

    /// Parses an already lexed token stream and returns its root value.
    /// Include directives are still expanded, against the include paths.
    pub fn parse_tokens(&self, mut tokens: Vec<Token>) -> Result<Value, CfgError> {
        if tokens.last().map_or(true, |t| t.kind != TokenKind::Eof) {
            let eof = tokens.last().map_or_else(
                || Token::new(TokenKind::Eof, "", 1, 1, 0, 0),
                |t| {
                    Token::new(
                        TokenKind::Eof,
                        "",
                        t.line,
                        t.column + t.text.chars().count(),
                        t.offset + t.text.len(),
                        t.source,
                    )
                },
            );
            tokens.push(eof);
        }

        let mut resolver = IncludeResolver::new(&self.options);
        resolver.register_source("<tokens>", "")?;
        let tokens = resolver.expand(tokens, None)?;
        let sources = resolver.into_sources();
        ParseContext::new(tokens, &sources, &self.options, self.variables.as_ref())
            .parse_document()
            .map(|document| document.root)
    }

    /// Checks that `text` parses, discarding the result.
    pub fn validate_syntax(&self, text: &str) -> Result<(), CfgError> {
        self.parse_str(text, "<input>").map(|_| ())
    }
}

/// State of a single parse call.
struct ParseContext<'a> {
    tokens: Vec<Token>,
    position: usize,
    sources: &'a SourceMap,
    options: &'a ParserOptions,
    expander: EnvExpander<'a>,
    enums: Vec<EnumDefinition>,
    /// Objects and arrays currently open.
    depth: usize,
}

impl<'a> ParseContext<'a> {
    fn new(
        tokens: Vec<Token>,
        sources: &'a SourceMap,
        options: &'a ParserOptions,
        variables: &'a dyn VariableSource,
    ) -> Self {
        ParseContext {
            tokens,
            position: 0,
            sources,
            options,
            expander: EnvExpander::new(variables),
            enums: Vec::new(),
            depth: 0,
        }
    }

    // === Main Parsing Methods ===

    ///    Document ::= { EnumDef } Value { EnumDef } EOF
    fn parse_document(mut self) -> Result<Document, CfgError> {
        self.parse_enum_definitions()?;

        // A file holding nothing but enum definitions has a null root.
        let root = if self.check(TokenKind::Eof) && !self.enums.is_empty() {
            Value::Null
        } else {
            self.parse_value()?
        };

        self.parse_enum_definitions()?;
        if !self.check(TokenKind::Eof) {
            return self.err_unexpected("end of input");
        }
        Ok(Document {
            root,
            enums: self.enums,
        })
    }

    fn parse_enum_definitions(&mut self) -> Result<(), CfgError> {
        while self.check(TokenKind::Enum) {
            let definition = self.parse_enum_definition()?;
            self.enums.push(definition);
        }
        Ok(())
    }

    /// Value ::= String | Number | Boolean | Null | EnvRef | Array | Object | EnumRef
    fn parse_value(&mut self) -> Result<Value, CfgError> {
        let token = self.current_token()?.clone();
        match token.kind {
            TokenKind::String => {
                self.advance();
                Ok(Value::String(self.decode_string(&token)?))
            }
            TokenKind::Integer => {
                self.advance();
                token
                    .text
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| self.invalid_number(&token))
            }
            TokenKind::Double => {
                self.advance();
                match token.text.parse::<f64>() {
                    Ok(d) if d.is_finite() => Ok(Value::Double(d)),
                    _ => Err(self.invalid_number(&token)),
                }
            }
            TokenKind::Boolean => {
                self.advance();
                Ok(Value::Boolean(token.text == "true"))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Value::Null)
            }
            TokenKind::EnvVar => {
                self.advance();
                if self.options.expand_env_vars {
                    Ok(Value::String(self.expander.expand(&token.text)?))
                } else {
                    Ok(Value::String(token.text))
                }
            }
            TokenKind::Identifier => self.parse_named(),
            TokenKind::Punctuation if token.is_punct('{') || token.is_punct('(') => {
                self.nested(&token, |ctx| ctx.parse_object(None))
            }
            TokenKind::Punctuation if token.is_punct('[') => {
                self.nested(&token, Self::parse_array)
            }
            _ => self.err_unexpected("a value"),
        }
    }

    /// Runs `parse` one nesting level deeper, failing once the configured
    /// limit is passed.
    fn nested(
        &mut self,
        start: &Token,
        parse: impl FnOnce(&mut Self) -> Result<Value, CfgError>,
    ) -> Result<Value, CfgError> {
        if self.depth >= self.options.max_nesting_depth {
            return Err(ParseError::NestingTooDeep {
                limit: self.options.max_nesting_depth,
                line: start.line,
                column: start.column,
                src: self.sources.get(start.source),
                span: start.span(),
            }
            .into());
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    /// A namespaced name followed by a parameter list or body starts a typed
    /// object; on its own it is an enum reference.
    fn parse_named(&mut self) -> Result<Value, CfgError> {
        let start = self.current_token()?.clone();
        let name = self.parse_namespaced_name()?;
        if self.check_punct('{') || self.check_punct('(') {
            self.nested(&start, |ctx| ctx.parse_object(Some(name)))
        } else {
            Ok(Value::EnumRef(name))
        }
    }

    ///    NamespacedName ::= Identifier { "::" Identifier }
    fn parse_namespaced_name(&mut self) -> Result<String, CfgError> {
        let mut name = self.expect_identifier("an identifier")?;
        while self.check(TokenKind::Namespace) {
            self.advance();
            let part = self.expect_identifier("an identifier after '::'")?;
            name.push_str("::");
            name.push_str(&part);
        }
        Ok(name)
    }

    ///    Object ::= [ NamespacedName ] [ "(" ParamList ")" ] "{" { Member } "}"
    fn parse_object(&mut self, type_name: Option<String>) -> Result<Value, CfgError> {
        let mut object = Object {
            type_name,
            ..Object::default()
        };
        if self.match_punct('(') {
            object.params = self.parse_params()?;
        }
        self.expect_punct('{', "'{'")?;
        while !self.check_punct('}') {
            if self.check(TokenKind::Eof) {
                return self.err_unexpected("'}' to close the object");
            }
            self.parse_member(&mut object)?;
        }
        self.expect_punct('}', "'}'")?;
        Ok(Value::Object(object))
    }

    ///    ParamList ::= Param { "," Param } [ "," ]
    fn parse_params(&mut self) -> Result<Vec<Param>, CfgError> {
        let mut params: Vec<Param> = Vec::new();
        while !self.check_punct(')') {
            let start = self.current_token()?.clone();
            let param = self.parse_param()?;
            if params.iter().any(|p| p.name == param.name) {
                return Err(ParseError::DuplicateParameter {
                    name: param.name,
                    line: start.line,
                    column: start.column,
                    src: self.sources.get(start.source),
                    span: start.span(),
                }
                .into());
            }
            params.push(param);
            if !self.match_punct(',') {
                break;
            }
        }
        self.expect_punct(')', "')' to close the parameter list")?;
        Ok(params)
    }

    ///    Param ::= NamespacedName [ "[" "]" ] Identifier [ "=" Value ]
    fn parse_param(&mut self) -> Result<Param, CfgError> {
        let type_name = self.parse_namespaced_name()?;
        let is_array = self.match_punct('[');
        if is_array {
            self.expect_punct(']', "']' after '['")?;
        }
        let name = self.expect_identifier("a parameter name")?;
        let default = if self.match_punct('=') {
            Some(self.parse_value()?)
        } else {
            None
        };
        Ok(Param {
            type_name,
            is_array,
            name,
            default,
        })
    }

    ///    Member ::= EnumDef | ( Identifier | String ) "=" Value [ ";" ]
    fn parse_member(&mut self, object: &mut Object) -> Result<(), CfgError> {
        let token = self.current_token()?.clone();
        let key = match token.kind {
            TokenKind::Enum => {
                let definition = self.parse_enum_definition()?;
                self.enums.push(definition);
                return Ok(());
            }
            TokenKind::Identifier => {
                self.advance();
                token.text.clone()
            }
            TokenKind::String => {
                self.advance();
                self.decode_string(&token)?
            }
            _ => return self.err_unexpected("a field name"),
        };

        self.expect_punct('=', "'=' after the field name")?;
        let value = self.parse_value()?;
        if object.insert(key.as_str(), value).is_some() {
            log::debug!(
                "field '{}' redefined at line {}; the last value wins",
                key,
                token.line
            );
        }
        self.match_punct(';');
        Ok(())
    }

    ///    Array ::= "[" { Value [ "," ] } "]"
    fn parse_array(&mut self) -> Result<Value, CfgError> {
        self.expect_punct('[', "'['")?;
        let mut items = Vec::new();
        while !self.check_punct(']') {
            if self.check(TokenKind::Eof) {
                return self.err_unexpected("']' to close the array");
            }
            items.push(self.parse_value()?);
            self.match_punct(',');
        }
        self.expect_punct(']', "']'")?;
        Ok(Value::Array(items))
    }

    ///    EnumDef ::= "enum" "::" NamespacedName "{" { EnumProp [ ";" | "," ] } "}" [ ";" ]
    ///    EnumProp ::= "values" "=" SymbolList
    ///               | "default" "=" Symbol
    ///               | "constraints" "=" "{" { Identifier "=" SymbolList [ ";" | "," ] } "}"
    fn parse_enum_definition(&mut self) -> Result<EnumDefinition, CfgError> {
        let start = self.current_token()?.clone();
        self.advance(); // enum
        if !self.check(TokenKind::Namespace) {
            return self.err_unexpected("'::' after 'enum'");
        }
        self.advance();

        let full_name = self.parse_namespaced_name()?;
        let (namespace, name) = match full_name.rsplit_once("::") {
            Some((namespace, name)) => (Some(namespace.to_string()), name.to_string()),
            None => (None, full_name.clone()),
        };
        let mut definition = EnumDefinition {
            name,
            namespace,
            ..EnumDefinition::default()
        };

        self.expect_punct('{', "'{' to open the enum body")?;
        while !self.check_punct('}') {
            let property = self.current_token()?.clone();
            if property.kind != TokenKind::Identifier {
                return self.err_unexpected("'values', 'default' or 'constraints'");
            }
            self.advance();
            self.expect_punct('=', "'='")?;
            match property.text.as_str() {
                "values" => definition.values = self.parse_symbol_list()?,
                "default" => definition.default = Some(self.parse_symbol()?),
                "constraints" => {
                    self.expect_punct('{', "'{' to open the constraints")?;
                    while !self.check_punct('}') {
                        let token = self.current_token()?.clone();
                        let context = match token.kind {
                            TokenKind::Identifier => {
                                self.advance();
                                token.text
                            }
                            TokenKind::String => {
                                self.advance();
                                self.decode_string(&token)?
                            }
                            _ => return self.err_unexpected("a constraint context name"),
                        };
                        self.expect_punct('=', "'='")?;
                        let subset = self.parse_symbol_list()?;
                        definition.constraints.insert(context, subset);
                        if !self.match_punct(';') {
                            self.match_punct(',');
                        }
                    }
                    self.expect_punct('}', "'}'")?;
                }
                _ => {
                    return Err(self.error_at(&property, "'values', 'default' or 'constraints'"));
                }
            }
            if !self.match_punct(';') {
                self.match_punct(',');
            }
        }
        self.expect_punct('}', "'}' to close the enum body")?;
        self.match_punct(';');

        definition.check().map_err(|reason| {
            CfgError::from(ParseError::InvalidEnum {
                name: full_name,
                reason,
                line: start.line,
                column: start.column,
                src: self.sources.get(start.source),
                span: start.span(),
            })
        })?;
        log::debug!(
            "enum '{}' defined with {} values",
            definition.qualified_name(),
            definition.values.len()
        );
        Ok(definition)
    }

    fn parse_symbol_list(&mut self) -> Result<Vec<String>, CfgError> {
        self.expect_punct('[', "'[' to open the value list")?;
        let mut symbols = Vec::new();
        while !self.check_punct(']') {
            if self.check(TokenKind::Eof) {
                return self.err_unexpected("']' to close the value list");
            }
            symbols.push(self.parse_symbol()?);
            self.match_punct(',');
        }
        self.expect_punct(']', "']'")?;
        Ok(symbols)
    }

    /// An enum member written as a bare name, a qualified name or a string.
    fn parse_symbol(&mut self) -> Result<String, CfgError> {
        let token = self.current_token()?.clone();
        match token.kind {
            TokenKind::String => {
                self.advance();
                self.decode_string(&token)
            }
            TokenKind::Identifier => {
                let name = self.parse_namespaced_name()?;
                Ok(match name.rsplit_once("::") {
                    Some((_, member)) => member.to_string(),
                    None => name,
                })
            }
            TokenKind::Boolean | TokenKind::Null | TokenKind::Integer => {
                self.advance();
                Ok(token.text)
            }
            _ => self.err_unexpected("an enum value"),
        }
    }

    // === Tokenizer Helper Methods ===

    fn current_token(&self) -> Result<&Token, CfgError> {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .ok_or_else(|| {
                ParseError::UnexpectedEof {
                    expected: "a value".to_string(),
                    line: 1,
                    column: 1,
                    src: self.sources.get(0),
                    span: (0, 0).into(),
                }
                .into()
            })
    }

    /// Never moves past the final Eof token.
    fn advance(&mut self) {
        if self.position + 1 < self.tokens.len() {
            self.position += 1;
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current_token().is_ok_and(|t| t.kind == kind)
    }

    fn check_punct(&self, c: char) -> bool {
        self.current_token().is_ok_and(|t| t.is_punct(c))
    }

    fn match_punct(&mut self, c: char) -> bool {
        if self.check_punct(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char, expected: &str) -> Result<(), CfgError> {
        if self.match_punct(c) {
            Ok(())
        } else {
            self.err_unexpected(expected)
        }
    }

    fn expect_identifier(&mut self, expected: &str) -> Result<String, CfgError> {
        let token = self.current_token()?;
        if token.kind == TokenKind::Identifier {
            let text = token.text.clone();
            self.advance();
            Ok(text)
        } else {
            self.err_unexpected(expected)
        }
    }

    fn decode_string(&self, token: &Token) -> Result<String, CfgError> {
        unescape(string_body(&token.text)).map_err(|sequence| {
            ParseError::InvalidEscape {
                sequence,
                line: token.line,
                column: token.column,
                src: self.sources.get(token.source),
                span: token.span(),
            }
            .into()
        })
    }

    fn invalid_number(&self, token: &Token) -> CfgError {
        ParseError::InvalidNumber {
            text: token.text.clone(),
            line: token.line,
            column: token.column,
            src: self.sources.get(token.source),
            span: token.span(),
        }
        .into()
    }

    fn error_at(&self, token: &Token, expected: &str) -> CfgError {
        let src = self.sources.get(token.source);
        if token.kind == TokenKind::Eof {
            ParseError::UnexpectedEof {
                expected: expected.to_string(),
                line: token.line,
                column: token.column,
                src,
                span: token.span(),
            }
            .into()
        } else {
            ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: token.text.clone(),
                line: token.line,
                column: token.column,
                src,
                span: token.span(),
            }
            .into()
        }
    }

    fn err_unexpected<T>(&self, expected: &str) -> Result<T, CfgError> {
        let token = self.current_token()?;
        Err(self.error_at(token, expected))
    }
}

/// The text between the quotes of a string token.
pub fn string_body(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(text)
}

/// Decodes `\" \\ \/ \n \t \r \0` and `\uXXXX` (with surrogate pairs).
/// Unknown escapes are kept verbatim. On failure the offending sequence is
/// returned.
pub fn unescape(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => out.push(read_unicode_escape(&mut chars)?),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Ok(out)
}

fn read_unicode_escape(chars: &mut std::str::Chars<'_>) -> Result<char, String> {
    let high = read_hex4(chars)?;
    if !(0xD800..0xDC00).contains(&high) {
        return char::from_u32(high).ok_or_else(|| format!("\\u{high:04X}"));
    }
    // A high surrogate must be followed by an escaped low surrogate.
    let lead = format!("\\u{high:04X}");
    if chars.next() != Some('\\') || chars.next() != Some('u') {
        return Err(lead);
    }
    let low = read_hex4(chars)?;
    if !(0xDC00..0xE000).contains(&low) {
        return Err(format!("{lead}\\u{low:04X}"));
    }
    char::from_u32(0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00))
        .ok_or_else(|| format!("{lead}\\u{low:04X}"))
}

fn read_hex4(chars: &mut std::str::Chars<'_>) -> Result<u32, String> {
    let digits: String = chars.by_ref().take(4).collect();
    if digits.len() != 4 {
        return Err(format!("\\u{digits}"));
    }
    u32::from_str_radix(&digits, 16).map_err(|_| format!("\\u{digits}"))
}
