use crate::ast::{Document, EnumDefinition, Object, Value};
use crate::error::ValidationError;
use crate::schema::{ObjectSchema, Schema, TypeRef};
use serde::Serialize;

/// Settings for one validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationContext {
    /// Constraint context key, e.g. `production`. When set, enum fields only
    /// accept the subset registered for it.
    pub context: Option<String>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, key: impl Into<String>) -> Self {
        self.context = Some(key.into());
        self
    }
}

/// Findings that do not make a document invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum ValidationWarning {
    /// More than one schema accepts an untyped object; the first was used.
    AmbiguousMatch { path: String, candidates: Vec<String> },
    /// The object names a type no schema declares.
    UnknownType { path: String, type_name: String },
    /// The object carries a field its schema does not declare.
    UnknownField { path: String, field: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

impl Schema {
    /// Validates `value` and returns every violation found. An empty list
    /// means the value conforms.
    pub fn validate(&self, value: &Value) -> Vec<ValidationError> {
        self.check(value, &ValidationContext::default()).errors
    }

    pub fn check(&self, value: &Value, context: &ValidationContext) -> ValidationReport {
        Validator::new(self, &[], context).run(value)
    }

    /// Like [`Schema::check`] with the default context, letting enum
    /// definitions declared in the document take part.
    pub fn validate_document(&self, document: &Document) -> ValidationReport {
        self.check_document(document, &ValidationContext::default())
    }

    pub fn check_document(
        &self,
        document: &Document,
        context: &ValidationContext,
    ) -> ValidationReport {
        Validator::new(self, &document.enums, context).run(&document.root)
    }
}

#[derive(Clone, Copy)]
struct Validator<'a> {
    schema: &'a Schema,
    document_enums: &'a [EnumDefinition],
    context: &'a ValidationContext,
    /// Set while scoring candidates: only declared fields are checked and
    /// positions with no declared type are left for the full pass.
    shallow: bool,
}

impl<'a> Validator<'a> {
    fn new(
        schema: &'a Schema,
        document_enums: &'a [EnumDefinition],
        context: &'a ValidationContext,
    ) -> Self {
        Validator {
            schema,
            document_enums,
            context,
            shallow: false,
        }
    }

    fn shallow(self) -> Self {
        Validator {
            shallow: true,
            ..self
        }
    }

    /// Runs `check` as a candidate and returns what it found.
    fn trial(&self, check: impl FnOnce(&Self, &mut ValidationReport)) -> ValidationReport {
        let mut trial = ValidationReport::default();
        check(&self.shallow(), &mut trial);
        trial
    }

    fn run(&self, value: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.untyped(value, "", &mut report);
        report
    }

    /// A value in a position with no declared type: objects pick their own
    /// schema, arrays are walked, scalars pass.
    fn untyped(&self, value: &Value, path: &str, report: &mut ValidationReport) {
        if self.shallow {
            return;
        }
        match value {
            Value::Object(object) => self.select_schema(object, path, report),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.untyped(item, &index_path(path, i), report);
                }
            }
            _ => {}
        }
    }

    fn select_schema(&self, object: &Object, path: &str, report: &mut ValidationReport) {
        if self.shallow {
            return;
        }
        if let Some(type_name) = &object.type_name {
            if let Some(schema) = self.schema.object(type_name) {
                log::debug!("'{}' validated as {} by type name", display_path(path), schema.name);
                self.against(object, schema, path, report);
                return;
            }
            report.warnings.push(ValidationWarning::UnknownType {
                path: path.to_string(),
                type_name: type_name.clone(),
            });
        }

        if self.schema.objects().next().is_none() {
            self.walk_fields(object, path, report);
            return;
        }

        let mut accepted: Vec<&ObjectSchema> = Vec::new();
        let mut closest: Option<(&ObjectSchema, usize)> = None;
        for schema in self.schema.objects() {
            let errors = self
                .trial(|v, trial| v.against(object, schema, path, trial))
                .errors
                .len();
            if errors == 0 {
                accepted.push(schema);
            } else if closest.map_or(true, |(_, best)| errors < best) {
                closest = Some((schema, errors));
            }
        }

        if accepted.len() > 1 {
            let candidates: Vec<String> = accepted.iter().map(|s| s.name.clone()).collect();
            log::warn!(
                "'{}' matches several schemas ({}); using {}",
                display_path(path),
                candidates.join(", "),
                candidates[0]
            );
            report.warnings.push(ValidationWarning::AmbiguousMatch {
                path: path.to_string(),
                candidates,
            });
        }

        let chosen = match accepted.first() {
            Some(schema) => {
                log::debug!("'{}' matched schema {}", display_path(path), schema.name);
                Some(*schema)
            }
            None => closest.map(|(schema, _)| schema),
        };
        if let Some(schema) = chosen {
            self.against(object, schema, path, report);
        }
    }

    fn against(
        &self,
        object: &Object,
        schema: &ObjectSchema,
        path: &str,
        report: &mut ValidationReport,
    ) {
        for field in schema.fields.values() {
            let field_path = join_path(path, &field.name);
            // Constructor parameters with defaults stand in for absent fields.
            let value = object.get(&field.name).or_else(|| {
                object
                    .param(&field.name)
                    .and_then(|param| param.default.as_ref())
            });
            match value {
                Some(value) => self.typed(value, &field.ty, &field_path, &field.name, report),
                None if field.required && !field.ty.is_optional() => {
                    report.errors.push(ValidationError::MissingField {
                        path: field_path,
                        field: field.name.clone(),
                    });
                }
                None => {}
            }
        }

        if self.shallow {
            return;
        }
        for (key, value) in &object.fields {
            if schema.get(key).is_none() {
                let field_path = join_path(path, key);
                report.warnings.push(ValidationWarning::UnknownField {
                    path: field_path.clone(),
                    field: key.clone(),
                });
                self.untyped(value, &field_path, report);
            }
        }
    }

    fn walk_fields(&self, object: &Object, path: &str, report: &mut ValidationReport) {
        for (key, value) in &object.fields {
            self.untyped(value, &join_path(path, key), report);
        }
    }

    fn typed(
        &self,
        value: &Value,
        ty: &TypeRef,
        path: &str,
        field: &str,
        report: &mut ValidationReport,
    ) {
        let accepted = match ty {
            TypeRef::Any => {
                self.untyped(value, path, report);
                true
            }
            TypeRef::Optional(inner) => {
                if !value.is_null() {
                    self.typed(value, inner, path, field, report);
                }
                true
            }
            TypeRef::Null => value.is_null(),
            TypeRef::Boolean => matches!(value, Value::Boolean(_)),
            TypeRef::Integer => matches!(value, Value::Integer(_)),
            TypeRef::Double => matches!(value, Value::Double(_)),
            TypeRef::Number => value.is_number(),
            TypeRef::String => matches!(value, Value::String(_)),
            TypeRef::Object => match value {
                Value::Object(object) => {
                    self.select_schema(object, path, report);
                    true
                }
                _ => false,
            },
            TypeRef::Array(inner) => match value {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        self.typed(item, inner, &index_path(path, i), field, report);
                    }
                    true
                }
                _ => false,
            },
            TypeRef::Union(alternatives) => {
                let mut closest: Option<(&TypeRef, ValidationReport)> = None;
                for alternative in alternatives {
                    let trial =
                        self.trial(|v, trial| v.typed(value, alternative, path, field, trial));
                    let clean = trial.errors.is_empty();
                    if closest
                        .as_ref()
                        .map_or(true, |(_, best)| trial.errors.len() < best.errors.len())
                    {
                        closest = Some((alternative, trial));
                    }
                    if clean {
                        break;
                    }
                }
                match closest {
                    // A mismatch at the union's own path means no alternative
                    // takes this kind of value; report the union as a whole.
                    Some((alternative, trial)) if !mismatch_at(&trial, path) => {
                        if self.shallow {
                            report.merge(trial);
                        } else {
                            self.typed(value, alternative, path, field, report);
                        }
                        true
                    }
                    _ => false,
                }
            }
            TypeRef::Named(name) => return self.named(value, name, path, field, report),
        };

        if !accepted {
            report.errors.push(ValidationError::TypeMismatch {
                path: path.to_string(),
                field: field.to_string(),
                expected: ty.to_string(),
                actual: describe(value),
            });
        }
    }

    fn named(
        &self,
        value: &Value,
        name: &str,
        path: &str,
        field: &str,
        report: &mut ValidationReport,
    ) {
        if let Some(definition) = self.find_enum(name) {
            self.enum_member(value, definition, path, field, report);
            return;
        }

        let mismatch = |report: &mut ValidationReport| {
            report.errors.push(ValidationError::TypeMismatch {
                path: path.to_string(),
                field: field.to_string(),
                expected: name.to_string(),
                actual: describe(value),
            });
        };

        match (self.schema.object(name), value) {
            (Some(schema), Value::Object(object)) => match &object.type_name {
                Some(type_name) if !schema.answers_to(type_name) => mismatch(report),
                _ => self.against(object, schema, path, report),
            },
            _ => mismatch(report),
        }
    }

    fn enum_member(
        &self,
        value: &Value,
        definition: &EnumDefinition,
        path: &str,
        field: &str,
        report: &mut ValidationReport,
    ) {
        let Some(symbol) = value.as_str() else {
            report.errors.push(ValidationError::TypeMismatch {
                path: path.to_string(),
                field: field.to_string(),
                expected: definition.qualified_name(),
                actual: describe(value),
            });
            return;
        };

        let permitted = definition.permitted(self.context.context.as_deref());
        let valid = match symbol.rsplit_once("::") {
            Some((prefix, member)) => {
                definition.is_named(prefix) && permitted.iter().any(|v| v == member)
            }
            None => permitted.iter().any(|v| v == symbol),
        };
        if !valid {
            report.errors.push(ValidationError::InvalidEnumValue {
                path: path.to_string(),
                field: field.to_string(),
                enum_name: definition.qualified_name(),
                value: symbol.to_string(),
                allowed: permitted.to_vec(),
            });
        }
    }

    /// Schema enums take precedence over enums declared in the document.
    fn find_enum(&self, name: &str) -> Option<&'a EnumDefinition> {
        self.schema
            .enum_def(name)
            .or_else(|| self.document_enums.iter().find(|e| e.is_named(name)))
    }
}

fn mismatch_at(trial: &ValidationReport, path: &str) -> bool {
    trial
        .errors
        .iter()
        .any(|e| matches!(e, ValidationError::TypeMismatch { .. }) && e.path() == path)
}

fn describe(value: &Value) -> String {
    match value {
        Value::Object(object) => object
            .type_name
            .clone()
            .unwrap_or_else(|| "object".to_string()),
        other => other.type_name().to_string(),
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn index_path(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}
