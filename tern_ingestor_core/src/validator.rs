use serde_json::Value;

use crate::{
    error::{
        ConstraintViolationSnafu, MissingFieldSnafu, TypeMismatchSnafu, ValidationError,
    },
    record::{Record, ValidRecord},
    schema::{Constraint, DataType, Field, SchemaRef},
};

/// Checks records against a schema snapshot.
///
/// The validator is stateless apart from the schema, so it is cheap to clone
/// and can run on the caller's task.
#[derive(Debug, Clone)]
pub struct RecordValidator {
    schema: SchemaRef,
}

impl RecordValidator {
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Validates a record, returning the first problem found.
    ///
    /// Fields are checked in schema order, unknown properties last.
    pub fn validate(&self, record: Record) -> Result<ValidRecord, ValidationError> {
        for field in self.schema.fields() {
            match record.fields.get(field.name()) {
                None | Some(Value::Null) => {
                    if field.is_required() {
                        return MissingFieldSnafu {
                            field: field.name(),
                        }
                        .fail();
                    }
                }
                Some(value) => validate_value(field, value)?,
            }
        }

        if !self.schema.allows_unknown_fields() {
            if let Some(name) = record
                .fields
                .keys()
                .find(|name| self.schema.field(name).is_none())
            {
                return ConstraintViolationSnafu {
                    field: name.as_str(),
                    message: "field is not declared in the schema",
                }
                .fail();
            }
        }

        Ok(ValidRecord::new(record))
    }
}

fn validate_value(field: &Field, value: &Value) -> Result<(), ValidationError> {
    let name = field.name();

    match (field.data_type(), value) {
        (DataType::Json, _)
        | (DataType::Boolean, Value::Bool(_))
        | (DataType::Float64, Value::Number(_))
        | (DataType::Utf8, Value::String(_)) => {}
        (DataType::Int64, Value::Number(n)) => {
            if n.as_i64().is_none() {
                if n.is_u64() {
                    return ConstraintViolationSnafu {
                        field: name,
                        message: format!("{n} is out of range for int64"),
                    }
                    .fail();
                }

                return type_mismatch(field, value);
            }
        }
        (DataType::Vector(dim), Value::Array(items)) => {
            if items.len() != *dim {
                return ConstraintViolationSnafu {
                    field: name,
                    message: format!("expected {dim} dimensions, got {}", items.len()),
                }
                .fail();
            }

            for (i, item) in items.iter().enumerate() {
                let Some(component) = item.as_f64() else {
                    return TypeMismatchSnafu {
                        field: format!("{name}[{i}]"),
                        expected: "float32",
                        found: json_kind(item),
                    }
                    .fail();
                };

                if !(component as f32).is_finite() {
                    return ConstraintViolationSnafu {
                        field: format!("{name}[{i}]"),
                        message: format!("{component} is not a finite float32"),
                    }
                    .fail();
                }
            }
        }
        _ => return type_mismatch(field, value),
    }

    for constraint in field.constraints() {
        check_constraint(name, constraint, value)?;
    }

    Ok(())
}

fn check_constraint(
    name: &str,
    constraint: &Constraint,
    value: &Value,
) -> Result<(), ValidationError> {
    match (constraint, value) {
        (Constraint::MaxLength(max), Value::String(s)) => {
            let len = s.chars().count();
            if len > *max {
                return ConstraintViolationSnafu {
                    field: name,
                    message: format!("length {len} exceeds maximum {max}"),
                }
                .fail();
            }
        }
        (Constraint::Range { min, max }, Value::Number(n)) => {
            let v = n.as_f64().unwrap_or(f64::NAN);
            if !(v >= *min && v <= *max) {
                return ConstraintViolationSnafu {
                    field: name,
                    message: format!("{n} is outside [{min}, {max}]"),
                }
                .fail();
            }
        }
        (Constraint::NonEmpty, Value::String(s)) if s.is_empty() => {
            return ConstraintViolationSnafu {
                field: name,
                message: "must not be empty",
            }
            .fail();
        }
        (Constraint::NonEmpty, Value::Array(items)) if items.is_empty() => {
            return ConstraintViolationSnafu {
                field: name,
                message: "must not be empty",
            }
            .fail();
        }
        // Constraints that do not apply to the value's type are ignored.
        _ => {}
    }

    Ok(())
}

fn type_mismatch(field: &Field, value: &Value) -> Result<(), ValidationError> {
    TypeMismatchSnafu {
        field: field.name(),
        expected: field.data_type().to_string(),
        found: json_kind(value),
    }
    .fail()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
