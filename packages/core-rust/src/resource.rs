//! Resource kinds and their typed field sets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::schema::{
    ColumnReader, ColumnValue, FieldDef, FieldType, ResourceSchema, SchemaError,
};

/// Discriminant for the resource kinds served by the catalog.
///
/// The lowercase plural name doubles as the service name, the HTTP path
/// prefix, and the SQL table name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Books,
    Comics,
    Users,
}

impl ResourceKind {
    /// All kinds, in declaration order.
    pub const ALL: [ResourceKind; 3] = [Self::Books, Self::Comics, Self::Users];

    /// Lowercase plural name (`"books"`, `"comics"`, `"users"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Books => "books",
            Self::Comics => "comics",
            Self::Users => "users",
        }
    }

    /// Singular noun used in error messages.
    #[must_use]
    pub fn singular(self) -> &'static str {
        match self {
            Self::Books => "book",
            Self::Comics => "comic",
            Self::Users => "user",
        }
    }

    /// Field declarations of this kind's schema.
    #[must_use]
    pub fn fields(self) -> &'static [FieldDef] {
        match self {
            Self::Books => BookFields::FIELDS,
            Self::Comics => ComicFields::FIELDS,
            Self::Users => UserFields::FIELDS,
        }
    }

    /// Rebuilds kind-tagged fields from column values.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if the values do not fit this kind's schema.
    pub fn fields_from_columns(self, values: Vec<ColumnValue>) -> Result<ResourceFields, SchemaError> {
        Ok(match self {
            Self::Books => ResourceFields::Books(BookFields::from_columns(values)?),
            Self::Comics => ResourceFields::Comics(ComicFields::from_columns(values)?),
            Self::Users => ResourceFields::Users(UserFields::from_columns(values)?),
        })
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "books" | "book" => Ok(Self::Books),
            "comics" | "comic" => Ok(Self::Comics),
            "users" | "user" => Ok(Self::Users),
            other => Err(SchemaError::UnknownKind(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Books
// ---------------------------------------------------------------------------

/// Fields of a book. Missing JSON fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookFields {
    pub title: String,
    pub author: String,
    pub year: i32,
    pub language: String,
    pub genres: Option<Vec<String>>,
    pub price: f64,
    pub quantity: i32,
}

impl ResourceSchema for BookFields {
    const KIND: ResourceKind = ResourceKind::Books;
    const FIELDS: &'static [FieldDef] = &[
        FieldDef::required("title", FieldType::Text),
        FieldDef::required("author", FieldType::Text),
        FieldDef::required("year", FieldType::Int),
        FieldDef::required("language", FieldType::Text),
        FieldDef::optional("genres", FieldType::TextList),
        FieldDef::required("price", FieldType::Float),
        FieldDef::required("quantity", FieldType::Int),
    ];

    fn to_columns(&self) -> Vec<ColumnValue> {
        vec![
            ColumnValue::Text(self.title.clone()),
            ColumnValue::Text(self.author.clone()),
            ColumnValue::Int(self.year),
            ColumnValue::Text(self.language.clone()),
            ColumnValue::opt_text_list(self.genres.as_ref()),
            ColumnValue::Float(self.price),
            ColumnValue::Int(self.quantity),
        ]
    }

    fn from_columns(values: Vec<ColumnValue>) -> Result<Self, SchemaError> {
        let mut r = ColumnReader::new(Self::KIND, Self::FIELDS, values)?;
        Ok(Self {
            title: r.text()?,
            author: r.text()?,
            year: r.int()?,
            language: r.text()?,
            genres: r.opt_text_list()?,
            price: r.float()?,
            quantity: r.int()?,
        })
    }

    fn into_fields(self) -> ResourceFields {
        ResourceFields::Books(self)
    }

    fn from_fields(fields: ResourceFields) -> Result<Self, SchemaError> {
        match fields {
            ResourceFields::Books(f) => Ok(f),
            other => Err(SchemaError::WrongKind {
                expected: Self::KIND,
                actual: other.kind(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Comics
// ---------------------------------------------------------------------------

/// Fields of a comic. Missing JSON fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComicFields {
    pub title: String,
    pub author: String,
    pub year: i32,
    pub language: String,
    pub price: f64,
    pub quantity: i32,
    pub publisher: Option<String>,
}

impl ResourceSchema for ComicFields {
    const KIND: ResourceKind = ResourceKind::Comics;
    const FIELDS: &'static [FieldDef] = &[
        FieldDef::required("title", FieldType::Text),
        FieldDef::required("author", FieldType::Text),
        FieldDef::required("year", FieldType::Int),
        FieldDef::required("language", FieldType::Text),
        FieldDef::required("price", FieldType::Float),
        FieldDef::required("quantity", FieldType::Int),
        FieldDef::optional("publisher", FieldType::Text),
    ];

    fn to_columns(&self) -> Vec<ColumnValue> {
        vec![
            ColumnValue::Text(self.title.clone()),
            ColumnValue::Text(self.author.clone()),
            ColumnValue::Int(self.year),
            ColumnValue::Text(self.language.clone()),
            ColumnValue::Float(self.price),
            ColumnValue::Int(self.quantity),
            ColumnValue::opt_text(self.publisher.as_ref()),
        ]
    }

    fn from_columns(values: Vec<ColumnValue>) -> Result<Self, SchemaError> {
        let mut r = ColumnReader::new(Self::KIND, Self::FIELDS, values)?;
        Ok(Self {
            title: r.text()?,
            author: r.text()?,
            year: r.int()?,
            language: r.text()?,
            price: r.float()?,
            quantity: r.int()?,
            publisher: r.opt_text()?,
        })
    }

    fn into_fields(self) -> ResourceFields {
        ResourceFields::Comics(self)
    }

    fn from_fields(fields: ResourceFields) -> Result<Self, SchemaError> {
        match fields {
            ResourceFields::Comics(f) => Ok(f),
            other => Err(SchemaError::WrongKind {
                expected: Self::KIND,
                actual: other.kind(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Fields of a user account. Missing JSON fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFields {
    pub name: String,
    pub email: String,
    pub password: String,
    pub activated: bool,
    pub roles: Option<Vec<String>>,
}

impl ResourceSchema for UserFields {
    const KIND: ResourceKind = ResourceKind::Users;
    const FIELDS: &'static [FieldDef] = &[
        FieldDef::required("name", FieldType::Text),
        FieldDef::required("email", FieldType::Text),
        FieldDef::required("password", FieldType::Text),
        FieldDef::required("activated", FieldType::Bool),
        FieldDef::optional("roles", FieldType::TextList),
    ];

    fn to_columns(&self) -> Vec<ColumnValue> {
        vec![
            ColumnValue::Text(self.name.clone()),
            ColumnValue::Text(self.email.clone()),
            ColumnValue::Text(self.password.clone()),
            ColumnValue::Bool(self.activated),
            ColumnValue::opt_text_list(self.roles.as_ref()),
        ]
    }

    fn from_columns(values: Vec<ColumnValue>) -> Result<Self, SchemaError> {
        let mut r = ColumnReader::new(Self::KIND, Self::FIELDS, values)?;
        Ok(Self {
            name: r.text()?,
            email: r.text()?,
            password: r.text()?,
            activated: r.boolean()?,
            roles: r.opt_text_list()?,
        })
    }

    fn into_fields(self) -> ResourceFields {
        ResourceFields::Users(self)
    }

    fn from_fields(fields: ResourceFields) -> Result<Self, SchemaError> {
        match fields {
            ResourceFields::Users(f) => Ok(f),
            other => Err(SchemaError::WrongKind {
                expected: Self::KIND,
                actual: other.kind(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Kind-tagged forms
// ---------------------------------------------------------------------------

/// Fields of any resource kind, tagged by kind.
///
/// This is the form that travels through the operation pipeline and the
/// storage adapters, which are not generic over the resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceFields {
    Books(BookFields),
    Comics(ComicFields),
    Users(UserFields),
}

impl ResourceFields {
    /// Returns the kind these fields belong to.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Books(_) => ResourceKind::Books,
            Self::Comics(_) => ResourceKind::Comics,
            Self::Users(_) => ResourceKind::Users,
        }
    }

    /// Column values in schema order.
    #[must_use]
    pub fn to_columns(&self) -> Vec<ColumnValue> {
        match self {
            Self::Books(f) => f.to_columns(),
            Self::Comics(f) => f.to_columns(),
            Self::Users(f) => f.to_columns(),
        }
    }
}

/// A stored resource: store-assigned identifier plus kind-tagged fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: u64,
    pub fields: ResourceFields,
}

impl Resource {
    /// Returns the kind of this resource.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.fields.kind()
    }

    /// Converts into the typed JSON form for a concrete schema.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::WrongKind` if the resource is of another kind.
    pub fn into_stored<F: ResourceSchema>(self) -> Result<Stored<F>, SchemaError> {
        Ok(Stored {
            id: self.id,
            fields: F::from_fields(self.fields)?,
        })
    }
}

/// Typed JSON form of a resource: `{"id": 7, "title": ..., ...}`.
///
/// Also serves as the update request body, where `id` comes from the path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stored<F> {
    #[serde(default)]
    pub id: u64,
    #[serde(flatten)]
    pub fields: F,
}

impl<F: ResourceSchema> From<Stored<F>> for Resource {
    fn from(stored: Stored<F>) -> Self {
        Resource {
            id: stored.id,
            fields: stored.fields.into_fields(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert_eq!("Comic".parse::<ResourceKind>().unwrap(), ResourceKind::Comics);
        assert!(matches!(
            "magazines".parse::<ResourceKind>(),
            Err(SchemaError::UnknownKind(_))
        ));
    }

    #[test]
    fn missing_fields_take_defaults_and_unknown_are_ignored() {
        let comic: ComicFields =
            serde_json::from_str(r#"{"title":"A","unexpected":true}"#).unwrap();
        assert_eq!(comic.title, "A");
        assert_eq!(comic.year, 0);
        assert_eq!(comic.price, 0.0);
        assert_eq!(comic.publisher, None);
    }

    #[test]
    fn stored_flattens_fields_next_to_id() {
        let stored = Stored {
            id: 7,
            fields: ComicFields {
                title: "A".to_string(),
                publisher: Some("P".to_string()),
                ..ComicFields::default()
            },
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["title"], "A");
        assert_eq!(json["publisher"], "P");

        let back: Stored<ComicFields> = serde_json::from_value(json).unwrap();
        assert_eq!(back, stored);
    }

    #[test]
    fn columns_round_trip_for_every_kind() {
        let book = BookFields {
            title: "Dune".to_string(),
            genres: Some(vec!["sf".to_string()]),
            price: 12.5,
            ..BookFields::default()
        };
        assert_eq!(BookFields::from_columns(book.to_columns()).unwrap(), book);

        let user = UserFields {
            name: "ada".to_string(),
            activated: true,
            ..UserFields::default()
        };
        let fields = ResourceKind::Users
            .fields_from_columns(user.clone().into_fields().to_columns())
            .unwrap();
        assert_eq!(fields, ResourceFields::Users(user));
    }

    #[test]
    fn from_fields_rejects_other_kind() {
        let fields = ResourceFields::Books(BookFields::default());
        assert_eq!(
            ComicFields::from_fields(fields),
            Err(SchemaError::WrongKind {
                expected: ResourceKind::Comics,
                actual: ResourceKind::Books,
            })
        );
    }

    #[test]
    fn resource_converts_to_typed_form() {
        let resource = Resource {
            id: 3,
            fields: ResourceFields::Comics(ComicFields::default()),
        };
        let stored: Stored<ComicFields> = resource.clone().into_stored().unwrap();
        assert_eq!(stored.id, 3);
        assert_eq!(Resource::from(stored), resource);
    }
}
