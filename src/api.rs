use crate::ast::Document;
use crate::error::CfgError;
use crate::parser::{Parser, ParserOptions};
use crate::render::render_document;
use crate::schema::Schema;
use crate::validator::{ValidationContext, ValidationReport};
use serde::{Serialize, Serializer};
use std::path::Path;

/// The result of a successful analysis of a CFG++ document: the parsed
/// document plus any schema diagnostics. Schema violations do not fail the
/// analysis; they are collected in `diagnostics`.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub document: Document,
    pub diagnostics: ValidationReport,
}

impl Serialize for Analysis {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.document.root.serialize(serializer)
    }
}

impl Analysis {
    /// True when validation found no errors. Warnings do not count.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_valid()
    }

    /// Serializes the document data into a pretty-printed JSON string.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self)
    }

    /// Serializes the document data into a YAML string.
    ///
    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self)
    }

    /// Renders the document back to CFG++ source.
    #[must_use]
    pub fn render(&self) -> String {
        render_document(&self.document)
    }
}

/// Analyzes a CFG++ source string with default options and no schema.
///
/// # Arguments
///
/// * `source` - The CFG++ source text.
/// * `file_name` - Name used in diagnostics; relative includes resolve
///   against its directory.
///
/// # Errors
///
/// Returns a `CfgError` if lexing, include resolution, environment expansion
/// or parsing fails.
pub fn analyze(source: &str, file_name: &str) -> Result<Analysis, CfgError> {
    analyze_with(source, file_name, &ParserOptions::default(), None)
}

/// Analyzes a CFG++ source string. When `schema` is given and validation is
/// enabled in `options`, the document is validated against it.
///
/// # Errors
///
/// Returns a `CfgError` if the document cannot be parsed.
pub fn analyze_with(
    source: &str,
    file_name: &str,
    options: &ParserOptions,
    schema: Option<&Schema>,
) -> Result<Analysis, CfgError> {
    let parser = Parser::with_options(options.clone());
    let document = parser.parse_str(source, file_name)?;
    Ok(diagnose(document, options, schema))
}

/// Reads and analyzes a file.
///
/// # Errors
///
/// Returns a `CfgError` if the file cannot be read or parsed.
pub fn analyze_file(
    path: impl AsRef<Path>,
    options: &ParserOptions,
    schema: Option<&Schema>,
) -> Result<Analysis, CfgError> {
    let parser = Parser::with_options(options.clone());
    let document = parser.parse_file(path)?;
    Ok(diagnose(document, options, schema))
}

fn diagnose(document: Document, options: &ParserOptions, schema: Option<&Schema>) -> Analysis {
    let diagnostics = match schema {
        Some(schema) if options.validation_enabled => {
            schema.check_document(&document, &ValidationContext::default())
        }
        _ => ValidationReport::default(),
    };
    Analysis {
        document,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_parse_to_json() {
        let source = r#"
        {
            name = "My App";
            version = 1.0;
            is_enabled = true;
            features = ["a", "b", "c"];
            config = {
                host = "localhost";
                port = 8080;
            }
        }
    "#;

        let expected_json = serde_json::json!({
            "name": "My App",
            "version": 1.0,
            "is_enabled": true,
            "features": ["a", "b", "c"],
            "config": {
                "host": "localhost",
                "port": 8080,
            }
        });

        let analysis = analyze(source, "test.cfgpp").unwrap();
        let result = analysis.to_json().unwrap();
        let result_json: serde_json::Value = serde_json::from_str(&result).unwrap();

        assert_eq!(result_json, expected_json);
        assert!(analysis.is_valid());
    }

    #[test]
    fn test_simple_parse_to_yaml() {
        let source = r#"App { name = "My App"; version = 1.5; is_enabled = true }"#;
        let analysis = analyze(source, "test.cfgpp").unwrap();
        assert_eq!(
            analysis.to_yaml().unwrap(),
            "name: My App\nversion: 1.5\nis_enabled: true\n"
        );
    }

    #[test]
    fn test_schema_diagnostics_are_collected() {
        let schema = Schema::parse("Server { host: string; port: integer; }").unwrap();
        let source = r#"Server { port = "80" }"#;

        let analysis =
            analyze_with(source, "test.cfgpp", &ParserOptions::default(), Some(&schema)).unwrap();
        assert!(!analysis.is_valid());
        assert_eq!(analysis.diagnostics.errors.len(), 2);

        let disabled = ParserOptions::default().with_validation(false);
        let analysis = analyze_with(source, "test.cfgpp", &disabled, Some(&schema)).unwrap();
        assert!(analysis.is_valid());
    }

    #[test]
    fn test_render_round_trips() {
        let analysis = analyze("Config { a = 1; b = [1, 2, 3]; }", "test.cfgpp").unwrap();
        let again = analyze(&analysis.render(), "test.cfgpp").unwrap();
        assert_eq!(again.document, analysis.document);
    }
}
