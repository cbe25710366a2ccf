use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::errors::SessionError;

/// Declared type of one contract field.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    String,
    /// A JSON number written as an integer (`3`, not `3.0`), readable as
    /// `i64` or `u64`.
    Integer,
    Number,
    Boolean,
    Array { items: Box<FieldType> },
    /// Nested record with its own declared fields.
    Object { fields: Vec<FieldSpec> },
    /// Free-form key/value object.
    Map,
    /// Any JSON value, including null.
    Any,
}

impl FieldType {
    pub fn array(items: FieldType) -> Self {
        Self::Array {
            items: Box::new(items),
        }
    }

    pub fn object(fields: Vec<FieldSpec>) -> Self {
        Self::Object { fields }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array { .. } => "array",
            Self::Object { .. } | Self::Map => "object",
            Self::Any => "any",
        }
    }
}

/// One named field of a contract.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Named, field-typed description of the record a response must decode to.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SchemaContract {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl SchemaContract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a required field.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec::required(name, field_type));
        self
    }

    /// Adds a field that may be absent or null.
    pub fn optional_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec::optional(name, field_type));
        self
    }

    /// Adds a fully specified field.
    pub fn with_field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Renders the contract as the endpoint's `responseSchema` object.
    pub fn to_response_schema(&self) -> Value {
        object_schema(&self.fields)
    }

    /// Validates `text` against this contract.
    pub fn validate(&self, text: &str) -> Result<Record, SessionError> {
        validate(text, self)
    }
}

fn object_schema(fields: &[FieldSpec]) -> Value {
    let mut properties = Map::new();
    for spec in fields {
        properties.insert(spec.name.clone(), field_schema(spec));
    }
    let required: Vec<&str> = fields
        .iter()
        .filter(|f| f.required)
        .map(|f| f.name.as_str())
        .collect();
    let ordering: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    json!({
        "type": "OBJECT",
        "properties": properties,
        "required": required,
        "propertyOrdering": ordering,
    })
}

fn field_schema(spec: &FieldSpec) -> Value {
    let mut schema = type_schema(&spec.field_type);
    if let Some(description) = &spec.description {
        schema["description"] = Value::String(description.clone());
    }
    if !spec.required {
        schema["nullable"] = Value::Bool(true);
    }
    schema
}

fn type_schema(field_type: &FieldType) -> Value {
    match field_type {
        FieldType::String => json!({"type": "STRING"}),
        FieldType::Integer => json!({"type": "INTEGER"}),
        FieldType::Number => json!({"type": "NUMBER"}),
        FieldType::Boolean => json!({"type": "BOOLEAN"}),
        FieldType::Array { items } => json!({"type": "ARRAY", "items": type_schema(items)}),
        FieldType::Object { fields } => object_schema(fields),
        FieldType::Map => json!({"type": "OBJECT"}),
        FieldType::Any => json!({}),
    }
}

/// What is wrong with one field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DefectKind {
    Missing,
    TypeMismatch { expected: String, found: String },
}

/// A field that failed validation, addressed by a dotted path (`a.b[2].c`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDefect {
    pub path: String,
    pub kind: DefectKind,
}

impl FieldDefect {
    pub fn new(path: impl Into<String>, kind: DefectKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

impl fmt::Display for FieldDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DefectKind::Missing => write!(f, "{}: missing", self.path),
            DefectKind::TypeMismatch { expected, found } => {
                write!(f, "{}: expected {expected}, found {found}", self.path)
            }
        }
    }
}

/// A response that satisfied its contract.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    contract: String,
    fields: Map<String, Value>,
}

impl Record {
    /// Name of the contract this record was validated against.
    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Decodes the record into a caller type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|e| {
            SessionError::Validation(format!(
                "record `{}` does not decode into the requested type: {e}",
                self.contract
            ))
        })
    }
}

/// Parses `text` as JSON and checks it against `contract`.
///
/// Syntax errors fail with `MalformedPayload`. A well-formed document that
/// misses required fields or carries wrongly typed values fails with
/// `SchemaValidation` listing every defect. Undeclared fields are ignored.
pub fn validate(text: &str, contract: &SchemaContract) -> Result<Record, SessionError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| SessionError::MalformedPayload {
            message: e.to_string(),
        })?;

    let mut defects = Vec::new();
    match value {
        Value::Object(fields) => {
            check_fields(&fields, &contract.fields, "", &mut defects);
            if defects.is_empty() {
                return Ok(Record {
                    contract: contract.name.clone(),
                    fields,
                });
            }
        }
        other => defects.push(FieldDefect::new(
            "$",
            DefectKind::TypeMismatch {
                expected: "object".into(),
                found: value_label(&other).into(),
            },
        )),
    }
    Err(SessionError::SchemaValidation {
        contract: contract.name.clone(),
        defects,
    })
}

fn check_fields(
    object: &Map<String, Value>,
    fields: &[FieldSpec],
    prefix: &str,
    defects: &mut Vec<FieldDefect>,
) {
    for spec in fields {
        let path = if prefix.is_empty() {
            spec.name.clone()
        } else {
            format!("{prefix}.{}", spec.name)
        };
        match object.get(&spec.name) {
            None if spec.required => defects.push(FieldDefect::new(path, DefectKind::Missing)),
            None => {}
            Some(Value::Null) if !spec.required => {}
            Some(value) => check_value(value, &spec.field_type, &path, defects),
        }
    }
}

fn check_value(value: &Value, field_type: &FieldType, path: &str, defects: &mut Vec<FieldDefect>) {
    let matches = match (field_type, value) {
        (FieldType::String, Value::String(_)) => true,
        (FieldType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (FieldType::Number, Value::Number(_)) => true,
        (FieldType::Boolean, Value::Bool(_)) => true,
        (FieldType::Map, Value::Object(_)) => true,
        (FieldType::Any, _) => true,
        (FieldType::Array { items }, Value::Array(elements)) => {
            for (idx, element) in elements.iter().enumerate() {
                check_value(element, items, &format!("{path}[{idx}]"), defects);
            }
            true
        }
        (FieldType::Object { fields }, Value::Object(object)) => {
            check_fields(object, fields, path, defects);
            true
        }
        _ => false,
    };
    if !matches {
        defects.push(FieldDefect::new(
            path,
            DefectKind::TypeMismatch {
                expected: field_type.label().into(),
                found: value_label(value).into(),
            },
        ));
    }
}

fn value_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
