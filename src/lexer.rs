use crate::error::LexError;
use miette::{NamedSource, SourceSpan};

/// Represents the different kinds of tokens that the lexer can produce.
/// Comments and whitespace are consumed by the lexer and never emitted.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TokenKind {
    /// An identifier, used for field names, type names and enum symbols.
    /// Examples: `port`, `Server`, `production`.
    Identifier,
    /// A double-quoted string literal. The token text keeps the quotes and the
    /// raw escape sequences; decoding happens in the parser.
    String,
    /// A number literal with no fraction or exponent.
    Integer,
    /// A number literal with a fraction, an exponent, or both.
    Double,
    /// `true` or `false`.
    Boolean,
    /// The `null` keyword.
    Null,
    /// The `enum` keyword, which opens an enum definition.
    Enum,
    /// `@include` or `@import`.
    Include,
    /// An environment reference, `${NAME}` or `${NAME:-default}`.
    EnvVar,
    /// Comparison, logical and arithmetic operators. Lexed but never evaluated.
    Operator,
    /// The namespace separator `::`.
    Namespace,
    /// One of `{ } ( ) [ ] , ; = . :`.
    Punctuation,
    /// End of input. Always the last token.
    Eof,
}

/// A token with its kind, exact source text and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based line.
    pub line: usize,
    /// 1-based column, counted in characters.
    pub column: usize,
    /// Byte offset into the source text.
    pub offset: usize,
    /// Index of the source this token was read from, for diagnostics.
    pub source: usize,
}

impl Token {
    pub fn new(
        kind: TokenKind,
        text: impl Into<String>,
        line: usize,
        column: usize,
        offset: usize,
        source: usize,
    ) -> Token {
        Token {
            kind,
            text: text.into(),
            line,
            column,
            offset,
            source,
        }
    }

    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punctuation && self.text.len() == 1 && self.text.starts_with(c)
    }

    pub fn span(&self) -> SourceSpan {
        (self.offset, self.text.len()).into()
    }
}

const OPERATORS: [&str; 15] = [
    ">=", "<=", "==", "!=", "&&", "||", "+", "-", "*", "/", ">", "<", "!", "&", "|",
];

const PUNCTUATION: &str = "{}()[],;=.:";

pub struct Lexer<'a> {
    input: &'a str,
    name: String,
    source: usize,
    position: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::with_name(input, "input.cfgpp", 0)
    }

    /// Creates a lexer whose tokens and errors refer to `name` and carry the
    /// given source index.
    pub fn with_name(input: &'a str, name: impl Into<String>, source: usize) -> Self {
        Self {
            input,
            name: name.into(),
            source,
            position: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        tokens.push(Token::new(
            TokenKind::Eof,
            "",
            self.line,
            self.column,
            self.position,
            self.source,
        ));
        log::trace!("lexed {} tokens from '{}'", tokens.len(), self.name);
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        loop {
            self.skip_whitespace();
            let Some(c) = self.peek() else {
                return Ok(None);
            };
            let (start, line, column) = (self.position, self.line, self.column);

            if c == '/' && self.peek_nth(1) == Some('/') {
                self.skip_line_comment();
                continue;
            }
            if c == '/' && self.peek_nth(1) == Some('*') {
                self.skip_block_comment(start, line, column)?;
                continue;
            }

            let kind = match c {
                '@' => self.read_directive(start, line, column)?,
                '$' if self.peek_nth(1) == Some('{') => self.read_env_var(start, line, column)?,
                '"' => self.read_string(start, line, column)?,
                c if c.is_ascii_digit() => self.read_number(),
                '-' | '+' if self.peek_nth(1).is_some_and(|d| d.is_ascii_digit()) => {
                    self.read_number()
                }
                c if c.is_ascii_alphabetic() || c == '_' => self.read_word(),
                ':' if self.peek_nth(1) == Some(':') => {
                    self.advance();
                    self.advance();
                    TokenKind::Namespace
                }
                _ => {
                    if let Some(op) = OPERATORS.iter().find(|op| self.rest().starts_with(**op)) {
                        for _ in 0..op.len() {
                            self.advance();
                        }
                        TokenKind::Operator
                    } else if PUNCTUATION.contains(c) {
                        self.advance();
                        TokenKind::Punctuation
                    } else {
                        return Err(LexError::UnexpectedCharacter {
                            ch: c,
                            line,
                            column,
                            src: self.named_source(),
                            span: (start, c.len_utf8()).into(),
                        });
                    }
                }
            };

            let text = &self.input[start..self.position];
            return Ok(Some(Token::new(kind, text, line, column, start, self.source)));
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.position..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn named_source(&self) -> NamedSource<String> {
        NamedSource::new(self.name.clone(), self.input.to_string())
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn skip_block_comment(
        &mut self,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<(), LexError> {
        self.advance();
        self.advance();
        while self.peek().is_some() {
            if self.rest().starts_with("*/") {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }
        Err(LexError::UnterminatedComment {
            line,
            column,
            src: self.named_source(),
            span: (start, 2).into(),
        })
    }

    fn read_identifier_chars(&mut self) {
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.advance();
        }
    }

    fn read_directive(
        &mut self,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<TokenKind, LexError> {
        self.advance(); // '@'
        self.read_identifier_chars();
        match &self.input[start + 1..self.position] {
            "include" | "import" => Ok(TokenKind::Include),
            other => Err(LexError::UnknownDirective {
                directive: format!("@{other}"),
                line,
                column,
                src: self.named_source(),
                span: (start, self.position - start).into(),
            }),
        }
    }

    fn read_env_var(
        &mut self,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<TokenKind, LexError> {
        self.advance(); // '$'
        self.advance(); // '{'

        let mut in_quotes = false;
        while let Some(c) = self.advance() {
            match c {
                '\\' if in_quotes => {
                    self.advance();
                }
                '"' => in_quotes = !in_quotes,
                '}' if !in_quotes => return Ok(TokenKind::EnvVar),
                '\n' if !in_quotes => break,
                _ => {}
            }
        }
        Err(LexError::UnterminatedEnvVar {
            line,
            column,
            src: self.named_source(),
            span: (start, 2).into(),
        })
    }

    fn read_string(
        &mut self,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<TokenKind, LexError> {
        self.advance(); // opening quote
        while let Some(c) = self.advance() {
            match c {
                '"' => return Ok(TokenKind::String),
                '\\' => {
                    if self.advance().is_none() {
                        break;
                    }
                }
                _ => {}
            }
        }
        Err(LexError::UnterminatedString {
            line,
            column,
            src: self.named_source(),
            span: (start, 1).into(),
        })
    }

    fn read_number(&mut self) -> TokenKind {
        let mut kind = TokenKind::Integer;
        if matches!(self.peek(), Some('-' | '+')) {
            self.advance();
        }
        self.read_digits();

        if self.peek() == Some('.') && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
            kind = TokenKind::Double;
            self.advance();
            self.read_digits();
        }

        if matches!(self.peek(), Some('e' | 'E')) {
            let exponent_follows = match self.peek_nth(1) {
                Some(c) if c.is_ascii_digit() => true,
                Some('+' | '-') => self.peek_nth(2).is_some_and(|c| c.is_ascii_digit()),
                _ => false,
            };
            if exponent_follows {
                kind = TokenKind::Double;
                self.advance();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.advance();
                }
                self.read_digits();
            }
        }
        kind
    }

    fn read_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    fn read_word(&mut self) -> TokenKind {
        let start = self.position;
        self.read_identifier_chars();
        match &self.input[start..self.position] {
            "true" | "false" => TokenKind::Boolean,
            "null" => TokenKind::Null,
            "enum" => TokenKind::Enum,
            _ => TokenKind::Identifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<(TokenKind, String)> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    fn k(kind: TokenKind, text: &str) -> (TokenKind, String) {
        (kind, text.to_string())
    }

    #[test]
    fn test_eof() {
        assert_eq!(kinds(""), vec![k(TokenKind::Eof, "")]);
        assert_eq!(kinds("   \n\t "), vec![k(TokenKind::Eof, "")]);
    }

    #[test]
    fn test_punctuation_and_namespace() {
        use TokenKind::*;
        assert_eq!(
            kinds("{}()[],;=.: ::"),
            vec![
                k(Punctuation, "{"),
                k(Punctuation, "}"),
                k(Punctuation, "("),
                k(Punctuation, ")"),
                k(Punctuation, "["),
                k(Punctuation, "]"),
                k(Punctuation, ","),
                k(Punctuation, ";"),
                k(Punctuation, "="),
                k(Punctuation, "."),
                k(Punctuation, ":"),
                k(Namespace, "::"),
                k(Eof, ""),
            ]
        );
    }

    #[test]
    fn test_keywords_need_word_boundaries() {
        use TokenKind::*;
        assert_eq!(
            kinds("true false null enum trueish nullable enums"),
            vec![
                k(Boolean, "true"),
                k(Boolean, "false"),
                k(Null, "null"),
                k(Enum, "enum"),
                k(Identifier, "trueish"),
                k(Identifier, "nullable"),
                k(Identifier, "enums"),
                k(Eof, ""),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        use TokenKind::*;
        assert_eq!(
            kinds("123 -10 +7 45.67 1e20 2.5E-3 0.5"),
            vec![
                k(Integer, "123"),
                k(Integer, "-10"),
                k(Integer, "+7"),
                k(Double, "45.67"),
                k(Double, "1e20"),
                k(Double, "2.5E-3"),
                k(Double, "0.5"),
                k(Eof, ""),
            ]
        );
    }

    #[test]
    fn test_dot_without_fraction_digits_is_punctuation() {
        use TokenKind::*;
        assert_eq!(
            kinds("1.x"),
            vec![
                k(Integer, "1"),
                k(Punctuation, "."),
                k(Identifier, "x"),
                k(Eof, "")
            ]
        );
    }

    #[test]
    fn test_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds(">= == != && || - * < !"),
            vec![
                k(Operator, ">="),
                k(Operator, "=="),
                k(Operator, "!="),
                k(Operator, "&&"),
                k(Operator, "||"),
                k(Operator, "-"),
                k(Operator, "*"),
                k(Operator, "<"),
                k(Operator, "!"),
                k(Eof, ""),
            ]
        );
    }

    #[test]
    fn test_strings_keep_raw_text() {
        use TokenKind::*;
        assert_eq!(
            kinds(r#""hello world" "" "a \"quoted\" \n word""#),
            vec![
                k(String, r#""hello world""#),
                k(String, r#""""#),
                k(String, r#""a \"quoted\" \n word""#),
                k(Eof, ""),
            ]
        );
    }

    #[test]
    fn test_env_references() {
        use TokenKind::*;
        assert_eq!(
            kinds(r#"${HOME} ${PORT:-8080} ${NAME:-"a } b"}"#),
            vec![
                k(EnvVar, "${HOME}"),
                k(EnvVar, "${PORT:-8080}"),
                k(EnvVar, r#"${NAME:-"a } b"}"#),
                k(Eof, ""),
            ]
        );
    }

    #[test]
    fn test_include_directives() {
        use TokenKind::*;
        assert_eq!(
            kinds(r#"@include "base.cfgpp" @import "more""#),
            vec![
                k(Include, "@include"),
                k(String, r#""base.cfgpp""#),
                k(Include, "@import"),
                k(String, r#""more""#),
                k(Eof, ""),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        use TokenKind::*;
        let input = "// line comment\nkey /* block\ncomment */ = 1 // trailing";
        assert_eq!(
            kinds(input),
            vec![
                k(Identifier, "key"),
                k(Punctuation, "="),
                k(Integer, "1"),
                k(Eof, "")
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::new("a = 1\n  b = \"é\" c").tokenize().unwrap();
        let positions: Vec<(usize, usize)> = tokens.iter().map(|t| (t.line, t.column)).collect();
        assert_eq!(
            positions,
            vec![(1, 1), (1, 3), (1, 5), (2, 3), (2, 5), (2, 7), (2, 11), (2, 12)]
        );
        assert_eq!(tokens[5].offset, 12);
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("x = \"abc").tokenize().unwrap_err();
        assert!(matches!(
            err,
            LexError::UnterminatedString {
                line: 1,
                column: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = Lexer::new("a /* never closed").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedComment { .. }));
    }

    #[test]
    fn test_unterminated_env_reference() {
        let err = Lexer::new("x = ${HOME\ny = 1").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedEnvVar { line: 1, .. }));
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("a = 1\nb = #").tokenize().unwrap_err();
        match err {
            LexError::UnexpectedCharacter {
                ch, line, column, ..
            } => {
                assert_eq!((ch, line, column), ('#', 2, 5));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_directive() {
        let err = Lexer::new("@when x").tokenize().unwrap_err();
        match err {
            LexError::UnknownDirective { directive, .. } => assert_eq!(directive, "@when"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
