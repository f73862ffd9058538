use crate::error::{CfgError, IncludeError, ParseError};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::parser::{string_body, unescape, ParserOptions};
use miette::NamedSource;
use std::path::{Path, PathBuf};

/// Extension appended to include targets that are written without one.
pub const DEFAULT_EXTENSION: &str = "cfgpp";

/// Every source text read during one parse call, indexed by `Token::source`.
#[derive(Debug, Default, Clone)]
pub struct SourceMap {
    sources: Vec<NamedSource<String>>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, text: &str) -> usize {
        self.sources.push(NamedSource::new(name, text.to_string()));
        self.sources.len() - 1
    }

    /// The named source for diagnostics. Tokens built by hand have no backing
    /// text and get an empty source.
    pub fn get(&self, index: usize) -> NamedSource<String> {
        self.sources
            .get(index)
            .cloned()
            .unwrap_or_else(|| NamedSource::new("<tokens>", String::new()))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Splices `@include "path"` directives into the token stream.
///
/// Each included file is lexed and its tokens (without the trailing Eof)
/// replace the directive, recursively and depth-first, so the parser sees one
/// flat stream. The resolver lives for a single parse call.
pub struct IncludeResolver<'o> {
    options: &'o ParserOptions,
    // Files currently being expanded, outermost first
    resolving_stack: Vec<PathBuf>,
    depth: usize,
    consumed: usize,
    sources: SourceMap,
}

impl<'o> IncludeResolver<'o> {
    pub fn new(options: &'o ParserOptions) -> Self {
        IncludeResolver {
            options,
            resolving_stack: Vec::new(),
            depth: 0,
            consumed: 0,
            sources: SourceMap::new(),
        }
    }

    /// Registers a source text and charges it against the input size budget.
    pub fn register_source(&mut self, name: &str, text: &str) -> Result<usize, CfgError> {
        let size = self.consumed + text.len();
        if let Some(limit) = self.options.max_input_size {
            if size > limit {
                return Err(CfgError::InputTooLarge { size, limit });
            }
        }
        self.consumed = size;
        Ok(self.sources.add(name, text))
    }

    /// Marks the file the root text was read from, so that including it again
    /// is reported as a cycle.
    pub fn enter_root(&mut self, path: &Path) {
        if let Ok(canonical) = path.canonicalize() {
            self.resolving_stack.push(canonical);
        }
    }

    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    pub fn into_sources(self) -> SourceMap {
        self.sources
    }

    /// Expands every include directive in `tokens`. `base_dir` is the
    /// directory of the file the tokens came from, if any.
    pub fn expand(
        &mut self,
        tokens: Vec<Token>,
        base_dir: Option<&Path>,
    ) -> Result<Vec<Token>, CfgError> {
        let mut expanded = Vec::with_capacity(tokens.len());
        let mut tokens = tokens.into_iter();

        while let Some(token) = tokens.next() {
            if token.kind != TokenKind::Include {
                expanded.push(token);
                continue;
            }
            if !self.options.process_includes {
                return Err(IncludeError::Disabled {
                    line: token.line,
                    column: token.column,
                }
                .into());
            }

            let target = match tokens.next() {
                Some(t) if t.kind == TokenKind::String => t,
                Some(t) => return Err(self.expected_path(&t).into()),
                None => return Err(self.expected_path(&token).into()),
            };
            let reference = unescape(string_body(&target.text)).map_err(|sequence| {
                ParseError::InvalidEscape {
                    sequence,
                    line: target.line,
                    column: target.column,
                    src: self.sources.get(target.source),
                    span: target.span(),
                }
            })?;

            let path = self.locate(&reference, base_dir, &target)?;
            let included = self.include(&path)?;
            expanded.extend(included);
        }
        Ok(expanded)
    }

    fn expected_path(&self, token: &Token) -> ParseError {
        let src = self.sources.get(token.source);
        if token.kind == TokenKind::Eof {
            ParseError::UnexpectedEof {
                expected: "a quoted include path".to_string(),
                line: token.line,
                column: token.column,
                src,
                span: token.span(),
            }
        } else {
            ParseError::UnexpectedToken {
                expected: "a quoted include path".to_string(),
                found: token.text.clone(),
                line: token.line,
                column: token.column,
                src,
                span: token.span(),
            }
        }
    }

    /// Resolves a reference against the including file's directory, then
    /// against each include path in order.
    fn locate(
        &self,
        reference: &str,
        base_dir: Option<&Path>,
        token: &Token,
    ) -> Result<PathBuf, CfgError> {
        let mut relative = PathBuf::from(reference);
        if relative.extension().is_none() {
            relative.set_extension(DEFAULT_EXTENSION);
        }

        let candidates: Vec<PathBuf> = if relative.is_absolute() {
            vec![relative]
        } else {
            base_dir
                .into_iter()
                .chain(self.options.include_paths.iter().map(PathBuf::as_path))
                .map(|dir| dir.join(&relative))
                .collect()
        };

        for candidate in &candidates {
            if candidate.is_file() {
                log::debug!("include '{}' resolved to {}", reference, candidate.display());
                return candidate.canonicalize().map_err(|e| {
                    IncludeError::Io {
                        path: candidate.display().to_string(),
                        message: e.to_string(),
                    }
                    .into()
                });
            }
        }

        Err(IncludeError::IncludeNotFound {
            path: reference.to_string(),
            line: token.line,
            column: token.column,
            src: self.sources.get(token.source),
            span: token.span(),
        }
        .into())
    }

    fn include(&mut self, path: &Path) -> Result<Vec<Token>, CfgError> {
        // 1. Cycle check against the files currently being expanded
        if let Some(start) = self.resolving_stack.iter().position(|p| p == path) {
            let chain = self.resolving_stack[start..]
                .iter()
                .chain(std::iter::once(&path.to_path_buf()))
                .map(|p| p.display().to_string())
                .collect();
            return Err(IncludeError::CircularInclude { chain }.into());
        }

        // 2. Depth limit
        if self.depth + 1 > self.options.max_include_depth {
            return Err(IncludeError::MaxIncludeDepthExceeded {
                path: path.display().to_string(),
                depth: self.depth + 1,
                limit: self.options.max_include_depth,
            }
            .into());
        }

        // 3. Read and lex the included file
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| IncludeError::Io {
            path: display.clone(),
            message: e.to_string(),
        })?;
        let source = self.register_source(&display, &text)?;
        let mut tokens = Lexer::with_name(&text, display.as_str(), source).tokenize()?;
        tokens.pop(); // Eof

        // 4. Expand its own includes before splicing
        self.resolving_stack.push(path.to_path_buf());
        self.depth += 1;
        let result = self.expand(tokens, path.parent());
        self.depth -= 1;
        self.resolving_stack.pop();
        result
    }
}
