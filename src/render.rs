//! Renders values and documents back to CFG++ source text.
//!
//! Output re-parses to an equal value: objects are written one field per line
//! with four-space indentation, arrays inline, strings re-escaped and doubles in
//! their shortest round-trip form.

use crate::ast::{Document, EnumDefinition, Object, Param, Value};
use crate::error::BufferTooSmall;
use crate::schema::is_identifier;
use std::fmt::Write;

const INDENT: &str = "    ";

pub fn render(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value, 0);
    out
}

/// Renders enum definitions first, then the root value. A document holding
/// only enum definitions renders without a root.
pub fn render_document(document: &Document) -> String {
    let mut out = String::new();
    for definition in &document.enums {
        write_enum(&mut out, definition);
        out.push('\n');
    }
    if !(document.root.is_null() && !document.enums.is_empty()) {
        write_value(&mut out, &document.root, 0);
        out.push('\n');
    }
    out
}

/// Renders into a caller-provided buffer and returns the number of bytes
/// written. Nothing is written when the buffer is too small.
pub fn render_into(value: &Value, buffer: &mut [u8]) -> Result<usize, BufferTooSmall> {
    write_into(&render(value), buffer)
}

pub(crate) fn write_into(text: &str, buffer: &mut [u8]) -> Result<usize, BufferTooSmall> {
    let bytes = text.as_bytes();
    let available = buffer.len();
    let target = buffer.get_mut(..bytes.len()).ok_or(BufferTooSmall {
        required: bytes.len(),
        available,
    })?;
    target.copy_from_slice(bytes);
    Ok(bytes.len())
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Integer(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Double(d) => write_double(out, *d),
        Value::String(s) => write_string(out, s),
        Value::EnumRef(symbol) => out.push_str(symbol),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item, depth);
            }
            out.push(']');
        }
        Value::Object(object) => write_object(out, object, depth),
    }
}

fn write_double(out: &mut String, d: f64) {
    if d.is_finite() {
        // Debug keeps a '.' or an exponent, so the text lexes as a double.
        let _ = write!(out, "{d:?}");
    } else {
        log::warn!("non-finite double {d} has no CFG++ form; writing null");
        out.push_str("null");
    }
}

fn write_object(out: &mut String, object: &Object, depth: usize) {
    if let Some(type_name) = &object.type_name {
        out.push_str(type_name);
    }
    if !object.params.is_empty() {
        out.push('(');
        for (i, param) in object.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_param(out, param, depth);
        }
        out.push(')');
    }
    if object.type_name.is_some() || !object.params.is_empty() {
        out.push(' ');
    }
    if object.fields.is_empty() {
        out.push_str("{}");
        return;
    }

    out.push_str("{\n");
    for (key, value) in &object.fields {
        push_indent(out, depth + 1);
        write_key(out, key);
        out.push_str(" = ");
        write_value(out, value, depth + 1);
        out.push('\n');
    }
    push_indent(out, depth);
    out.push('}');
}

fn write_param(out: &mut String, param: &Param, depth: usize) {
    out.push_str(&param.type_name);
    if param.is_array {
        out.push_str("[]");
    }
    out.push(' ');
    out.push_str(&param.name);
    if let Some(default) = &param.default {
        out.push_str(" = ");
        write_value(out, default, depth);
    }
}

fn write_enum(out: &mut String, definition: &EnumDefinition) {
    let _ = writeln!(out, "enum::{} {{", definition.qualified_name());
    out.push_str(INDENT);
    out.push_str("values = ");
    write_symbols(out, &definition.values);
    out.push('\n');
    if let Some(default) = &definition.default {
        out.push_str(INDENT);
        out.push_str("default = ");
        write_symbol(out, default);
        out.push('\n');
    }
    if !definition.constraints.is_empty() {
        out.push_str(INDENT);
        out.push_str("constraints = {\n");
        for (context, subset) in &definition.constraints {
            push_indent(out, 2);
            write_key(out, context);
            out.push_str(" = ");
            write_symbols(out, subset);
            out.push('\n');
        }
        out.push_str(INDENT);
        out.push_str("}\n");
    }
    out.push_str("}\n");
}

fn write_symbols(out: &mut String, symbols: &[String]) {
    out.push('[');
    for (i, symbol) in symbols.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_symbol(out, symbol);
    }
    out.push(']');
}

fn write_symbol(out: &mut String, symbol: &str) {
    if is_bare(symbol) {
        out.push_str(symbol);
    } else {
        write_string(out, symbol);
    }
}

fn write_key(out: &mut String, key: &str) {
    if is_bare(key) {
        out.push_str(key);
    } else {
        write_string(out, key);
    }
}

fn is_bare(text: &str) -> bool {
    is_identifier(text) && !matches!(text, "true" | "false" | "null" | "enum")
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn parse(source: &str) -> Document {
        Parser::new().parse_str(source, "test.cfgpp").unwrap()
    }

    #[test]
    fn test_render_config_scenario() {
        let doc = parse("Config { a = 1; b = [1,2,3]; }");
        assert_eq!(render(&doc.root), "Config {\n    a = 1\n    b = [1, 2, 3]\n}");
    }

    #[test]
    fn test_render_scalars() {
        assert_eq!(render(&Value::Double(1.0)), "1.0");
        assert_eq!(render(&Value::Double(0.1)), "0.1");
        assert_eq!(render(&Value::Double(1e300)), "1e300");
        assert_eq!(render(&Value::Double(f64::NAN)), "null");
        assert_eq!(render(&Value::Integer(-42)), "-42");
        assert_eq!(render(&Value::EnumRef("Level::warn".into())), "Level::warn");
        assert_eq!(
            render(&Value::String("a \"q\"\n\u{1}".into())),
            r#""a \"q\"\n\u0001""#
        );
    }

    #[test]
    fn test_render_quotes_awkward_keys() {
        let value = Value::Object(
            Object::new()
                .with_field("plain", true)
                .with_field("with space", Value::Null)
                .with_field("null", "x"),
        );
        assert_eq!(
            render(&value),
            "{\n    plain = true\n    \"with space\" = null\n    \"null\" = \"x\"\n}"
        );
    }

    #[test]
    fn test_round_trip() {
        let source = r#"
            App::Service(string host = "localhost", int[] ports = [80, 443]) {
                name = "demo \"svc\"\ttabbed"
                ratio = 0.25
                big = -9223372036854775808
                tiny = 1e-7
                level = Level::warn
                "odd key" = { nested = [ { a = 1 }, [], {} ] }
                env = null
                empty = Empty {}
            }
        "#;
        let root = parse(source).root;
        let rendered = render(&root);
        assert_eq!(parse(&rendered).root, root, "rendered:\n{rendered}");
    }

    #[test]
    fn test_render_document_with_enums() {
        let source = r#"
            enum::app::Level {
                values = [debug, warn, "odd value"]
                default = warn
                constraints = { production = [warn] }
            }
            Config { level = warn }
        "#;
        let doc = parse(source);
        let rendered = render_document(&doc);
        assert!(rendered.starts_with("enum::app::Level {\n    values = [debug, warn, \"odd value\"]\n"));
        assert_eq!(parse(&rendered), doc);

        let only_enums = parse("enum::Mode { values = [a] }");
        assert_eq!(render_document(&only_enums), "enum::Mode {\n    values = [a]\n}\n\n");
        assert_eq!(parse(&render_document(&only_enums)), only_enums);
    }

    #[test]
    fn test_render_into_buffer() {
        let value = Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
        let mut small = [0u8; 3];
        assert_eq!(
            render_into(&value, &mut small),
            Err(BufferTooSmall {
                required: 6,
                available: 3
            })
        );
        let mut buffer = [0u8; 16];
        let written = render_into(&value, &mut buffer).unwrap();
        assert_eq!(&buffer[..written], b"[1, 2]");
    }
}
