//! Static resource schemas and the column form used by SQL backends.
//!
//! Every resource kind declares its fields once, as a `&'static [FieldDef]`
//! slice. The same declaration drives DDL generation, positional column
//! binding, and row decoding, so the SQL adapters stay resource-agnostic.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::resource::{ResourceFields, ResourceKind};

/// Scalar type of a single resource field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// UTF-8 string.
    Text,
    /// Signed 32-bit integer.
    Int,
    /// 64-bit IEEE 754 float.
    Float,
    /// Boolean flag.
    Bool,
    /// Ordered list of strings.
    TextList,
}

impl FieldType {
    /// Column type used when generating DDL for this field.
    #[must_use]
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Int => "INTEGER",
            Self::Float => "DOUBLE PRECISION",
            Self::Bool => "BOOLEAN",
            Self::TextList => "TEXT[]",
        }
    }
}

/// Single field definition within a resource schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Name of the field, identical in JSON and in the SQL column.
    pub name: &'static str,
    /// Scalar type of the field.
    pub ty: FieldType,
    /// Required fields are never null; a missing value takes the type default.
    pub required: bool,
}

impl FieldDef {
    /// Declares a required field.
    #[must_use]
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
        }
    }

    /// Declares an optional (nullable) field.
    #[must_use]
    pub const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: false,
        }
    }

    /// Column definition fragment, e.g. `title TEXT NOT NULL`.
    #[must_use]
    pub fn column_ddl(&self) -> String {
        if self.required {
            format!("{} {} NOT NULL", self.name, self.ty.sql_type())
        } else {
            format!("{} {}", self.name, self.ty.sql_type())
        }
    }
}

/// A single column value in schema order.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// SQL NULL, carrying the declared type so backends can bind it.
    Null(FieldType),
    Text(String),
    Int(i32),
    Float(f64),
    Bool(bool),
    TextList(Vec<String>),
}

impl ColumnValue {
    /// Returns the scalar type this value binds as.
    #[must_use]
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Null(ty) => *ty,
            Self::Text(_) => FieldType::Text,
            Self::Int(_) => FieldType::Int,
            Self::Float(_) => FieldType::Float,
            Self::Bool(_) => FieldType::Bool,
            Self::TextList(_) => FieldType::TextList,
        }
    }

    /// Wraps an optional string, producing a typed NULL for `None`.
    #[must_use]
    pub fn opt_text(value: Option<&String>) -> Self {
        value.map_or(Self::Null(FieldType::Text), |v| Self::Text(v.clone()))
    }

    /// Wraps an optional string list, producing a typed NULL for `None`.
    #[must_use]
    pub fn opt_text_list(value: Option<&Vec<String>>) -> Self {
        value.map_or(Self::Null(FieldType::TextList), |v| Self::TextList(v.clone()))
    }
}

/// Errors raised while converting between typed fields and columns.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown resource kind: {0}")]
    UnknownKind(String),
    #[error("column count mismatch for {kind}: expected {expected}, got {actual}")]
    ColumnCount {
        kind: ResourceKind,
        expected: usize,
        actual: usize,
    },
    #[error("column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: &'static str,
        expected: FieldType,
        actual: FieldType,
    },
    #[error("required column {column} is null")]
    NullRequired { column: &'static str },
    #[error("expected {expected} fields, got {actual}")]
    WrongKind {
        expected: ResourceKind,
        actual: ResourceKind,
    },
}

/// A resource kind's statically declared schema.
///
/// Implemented by the typed field structs (`BookFields`, `ComicFields`,
/// `UserFields`). The serde impls are the JSON/MsgPack schema; the column
/// methods are the SQL schema. Both follow `FIELDS` order.
pub trait ResourceSchema:
    Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
    /// Resource kind these fields belong to.
    const KIND: ResourceKind;

    /// Field declarations in column order.
    const FIELDS: &'static [FieldDef];

    /// Flattens the fields into column values in `FIELDS` order.
    fn to_columns(&self) -> Vec<ColumnValue>;

    /// Rebuilds the typed fields from column values in `FIELDS` order.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` when the count, a type, or a required value
    /// does not match the declaration.
    fn from_columns(values: Vec<ColumnValue>) -> Result<Self, SchemaError>;

    /// Erases the concrete type into the kind-tagged enum.
    fn into_fields(self) -> ResourceFields;

    /// Recovers the concrete type from the kind-tagged enum.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::WrongKind` when `fields` belongs to another kind.
    fn from_fields(fields: ResourceFields) -> Result<Self, SchemaError>;
}

/// Positional reader that checks each value against its `FieldDef`.
pub struct ColumnReader {
    fields: &'static [FieldDef],
    values: std::vec::IntoIter<ColumnValue>,
    pos: usize,
}

impl ColumnReader {
    /// Creates a reader after checking the value count.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::ColumnCount` if `values` does not have exactly
    /// one entry per declared field.
    pub fn new(
        kind: ResourceKind,
        fields: &'static [FieldDef],
        values: Vec<ColumnValue>,
    ) -> Result<Self, SchemaError> {
        if values.len() != fields.len() {
            return Err(SchemaError::ColumnCount {
                kind,
                expected: fields.len(),
                actual: values.len(),
            });
        }
        Ok(Self {
            fields,
            values: values.into_iter(),
            pos: 0,
        })
    }

    fn next(&mut self, expected: FieldType) -> Result<(FieldDef, ColumnValue), SchemaError> {
        let def = self.fields[self.pos];
        self.pos += 1;
        // Length was checked in `new`, so the iterator cannot run dry here.
        let value = self.values.next().unwrap_or(ColumnValue::Null(def.ty));
        if def.ty != expected || value.field_type() != expected {
            return Err(SchemaError::TypeMismatch {
                column: def.name,
                expected: def.ty,
                actual: value.field_type(),
            });
        }
        if def.required && matches!(value, ColumnValue::Null(_)) {
            return Err(SchemaError::NullRequired { column: def.name });
        }
        Ok((def, value))
    }

    /// Reads a required text column.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` on a type mismatch or a NULL value.
    pub fn text(&mut self) -> Result<String, SchemaError> {
        match self.next(FieldType::Text)? {
            (_, ColumnValue::Text(v)) => Ok(v),
            (def, _) => Err(SchemaError::NullRequired { column: def.name }),
        }
    }

    /// Reads an optional text column.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` on a type mismatch.
    pub fn opt_text(&mut self) -> Result<Option<String>, SchemaError> {
        match self.next(FieldType::Text)? {
            (_, ColumnValue::Text(v)) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    /// Reads a required integer column.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` on a type mismatch or a NULL value.
    pub fn int(&mut self) -> Result<i32, SchemaError> {
        match self.next(FieldType::Int)? {
            (_, ColumnValue::Int(v)) => Ok(v),
            (def, _) => Err(SchemaError::NullRequired { column: def.name }),
        }
    }

    /// Reads a required float column.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` on a type mismatch or a NULL value.
    pub fn float(&mut self) -> Result<f64, SchemaError> {
        match self.next(FieldType::Float)? {
            (_, ColumnValue::Float(v)) => Ok(v),
            (def, _) => Err(SchemaError::NullRequired { column: def.name }),
        }
    }

    /// Reads a required boolean column.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` on a type mismatch or a NULL value.
    pub fn boolean(&mut self) -> Result<bool, SchemaError> {
        match self.next(FieldType::Bool)? {
            (_, ColumnValue::Bool(v)) => Ok(v),
            (def, _) => Err(SchemaError::NullRequired { column: def.name }),
        }
    }

    /// Reads an optional string-list column.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` on a type mismatch.
    pub fn opt_text_list(&mut self) -> Result<Option<Vec<String>>, SchemaError> {
        match self.next(FieldType::TextList)? {
            (_, ColumnValue::TextList(v)) => Ok(Some(v)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[FieldDef] = &[
        FieldDef::required("title", FieldType::Text),
        FieldDef::optional("publisher", FieldType::Text),
    ];

    #[test]
    fn column_ddl_marks_required_not_null() {
        assert_eq!(FIELDS[0].column_ddl(), "title TEXT NOT NULL");
        assert_eq!(FIELDS[1].column_ddl(), "publisher TEXT");
    }

    #[test]
    fn reader_rejects_wrong_count() {
        let err = ColumnReader::new(ResourceKind::Comics, FIELDS, vec![]).err();
        assert_eq!(
            err,
            Some(SchemaError::ColumnCount {
                kind: ResourceKind::Comics,
                expected: 2,
                actual: 0,
            })
        );
    }

    #[test]
    fn reader_rejects_null_in_required_column() {
        let mut reader = ColumnReader::new(
            ResourceKind::Comics,
            FIELDS,
            vec![ColumnValue::Null(FieldType::Text), ColumnValue::Null(FieldType::Text)],
        )
        .unwrap();
        assert_eq!(
            reader.text(),
            Err(SchemaError::NullRequired { column: "title" })
        );
    }

    #[test]
    fn reader_accepts_null_in_optional_column() {
        let mut reader = ColumnReader::new(
            ResourceKind::Comics,
            FIELDS,
            vec![
                ColumnValue::Text("A".to_string()),
                ColumnValue::Null(FieldType::Text),
            ],
        )
        .unwrap();
        assert_eq!(reader.text().unwrap(), "A");
        assert_eq!(reader.opt_text().unwrap(), None);
    }

    #[test]
    fn reader_reports_type_mismatch() {
        let mut reader = ColumnReader::new(
            ResourceKind::Comics,
            FIELDS,
            vec![ColumnValue::Int(3), ColumnValue::Null(FieldType::Text)],
        )
        .unwrap();
        assert!(matches!(
            reader.text(),
            Err(SchemaError::TypeMismatch {
                column: "title",
                actual: FieldType::Int,
                ..
            })
        ));
    }
}
