// Error surface of the API layer: kinds, flat reports and conversions

use cfgpp_core::error::{BinaryError, BufferTooSmall, CfgError, SchemaSyntaxError};
use cfgpp_core::{analyze, analyze_file, ErrorReport, ParserOptions, Schema, ValidationError};

#[test]
fn test_api_analyze_parse_error() {
    let result = analyze("{ invalid syntax", "test.cfgpp");
    if let Err(CfgError::Parse(_)) = result {
        // Success
    } else {
        panic!("Expected parser error, got {result:?}");
    }
}

#[test]
fn test_api_analyze_lex_error() {
    let result = analyze("{ a = 1 ~ }", "test.cfgpp");
    assert!(matches!(result, Err(CfgError::Lex(_))));
}

#[test]
fn test_api_relative_and_absolute_names() {
    assert!(analyze("{}", "relative/path/test.cfgpp").is_ok());
    assert!(analyze("{}", "/absolute/path/test.cfgpp").is_ok());
    assert!(analyze("{}", "").is_ok());
}

#[test]
fn test_api_missing_file() {
    let err = analyze_file("/nonexistent/config.cfgpp", &ParserOptions::default(), None)
        .unwrap_err();
    assert_eq!(err.kind(), "IoError");
    assert_eq!(err.line(), None);
}

#[test]
fn test_include_disabled_is_reported() {
    let options = ParserOptions::default().with_includes(false);
    let err = cfgpp_core::analyze_with("@include \"x\"", "t.cfgpp", &options, None).unwrap_err();
    assert_eq!(err.kind(), "IncludeError");
    assert_eq!((err.line(), err.column()), (Some(1), Some(1)));
}

#[test]
fn test_error_report_serializes_flat() {
    let err = analyze("{ a = }", "test.cfgpp").unwrap_err();
    let json = serde_json::to_value(err.report()).unwrap();
    assert_eq!(json["kind"], "ParseError");
    assert_eq!(json["line"], 1);
    assert_eq!(json["column"], 7);
    assert!(json["message"].as_str().unwrap().starts_with("Unexpected token"));
}

#[test]
fn test_error_report_omits_unknown_position() {
    let err = CfgError::InputTooLarge {
        size: 10,
        limit: 5,
    };
    let json = serde_json::to_string(&err.report()).unwrap();
    assert_eq!(
        json,
        r#"{"kind":"InputTooLarge","message":"Input too large: 10 bytes exceeds the configured limit of 5 bytes"}"#
    );
}

#[test]
fn test_schema_errors_carry_line_numbers() {
    let err = Schema::parse("Server {\n    host string;\n}").unwrap_err();
    assert_eq!(err.line(), Some(2));

    let err = Schema::parse("Server {\n    backup: Missing;\n}").unwrap_err();
    assert!(matches!(err, SchemaSyntaxError::UnresolvedType { line: 2, .. }));

    let report = CfgError::from(err).report();
    assert_eq!(report.kind, "SchemaSyntaxError");
    assert_eq!(report.line, Some(2));
}

#[test]
fn test_buffer_too_small_is_distinct() {
    let err = CfgError::from(BufferTooSmall {
        required: 32,
        available: 16,
    });
    assert_eq!(err.kind(), "BufferTooSmallError");

    let decode = CfgError::from(BinaryError::TruncatedCluster {
        decoded: 1,
        expected: 2,
    });
    assert_eq!(decode.kind(), "BinaryDecodeError");
}

#[test]
fn test_validation_errors_convert_to_reports() {
    let error = ValidationError::TypeMismatch {
        path: "server.port".into(),
        field: "port".into(),
        expected: "integer".into(),
        actual: "string".into(),
    };
    let report = ErrorReport::from(&error);
    assert_eq!(report.kind, "TypeMismatchError");
    assert_eq!(
        report.message,
        "Type mismatch for field 'port' at 'server.port': expected integer, found string"
    );

    let json = serde_json::to_value(&error).unwrap();
    assert_eq!(json["kind"], "TypeMismatch");
    assert_eq!(json["path"], "server.port");
}
