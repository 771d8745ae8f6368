//! The schema snapshot records are validated against.
use std::{fmt, sync::Arc};

pub type SchemaRef = Arc<Schema>;

/// The type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    /// `true` or `false`.
    Boolean,
    /// A signed 64-bit integer.
    Int64,
    /// Any JSON number.
    Float64,
    /// A UTF-8 string.
    Utf8,
    /// A fixed-size array of numbers representable as `f32`.
    Vector(usize),
    /// Any JSON value.
    Json,
}

/// An additional constraint on a field's value.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Maximum number of characters in a string.
    MaxLength(usize),
    /// Inclusive range for numbers.
    Range { min: f64, max: f64 },
    /// Strings and arrays must not be empty.
    NonEmpty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    data_type: DataType,
    required: bool,
    constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    fields: Vec<Field>,
    allow_unknown_fields: bool,
}

impl Field {
    /// Creates a new required field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            required: true,
            constraints: Vec::new(),
        }
    }

    /// Creates a new field that may be absent or `null`.
    pub fn optional(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            required: false,
            ..Self::new(name, data_type)
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }
}

impl Schema {
    /// Creates a schema that accepts properties not listed in `fields`.
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            allow_unknown_fields: true,
        }
    }

    /// Whether records may carry properties not declared in the schema.
    pub fn with_unknown_fields(mut self, allow: bool) -> Self {
        self.allow_unknown_fields = allow;
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn allows_unknown_fields(&self) -> bool {
        self.allow_unknown_fields
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "boolean"),
            Self::Int64 => write!(f, "int64"),
            Self::Float64 => write!(f, "float64"),
            Self::Utf8 => write!(f, "utf8"),
            Self::Vector(dim) => write!(f, "vector[{dim}]"),
            Self::Json => write!(f, "json"),
        }
    }
}
