use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// User fields that are validated or carry a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Email,
    Phone,
    Password,
    Role,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Email => "email",
            Field::Phone => "phone",
            Field::Password => "password",
            Field::Role => "role",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Missing,
    Malformed,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Missing => f.write_str("missing"),
            Reason::Malformed => f.write_str("malformed"),
        }
    }
}

/// Input rejected before reaching the database.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} invalid: {reason}")]
pub struct ValidationError {
    pub field: Field,
    pub reason: Reason,
}

impl ValidationError {
    pub fn missing(field: Field) -> Self {
        Self {
            field,
            reason: Reason::Missing,
        }
    }

    pub fn malformed(field: Field) -> Self {
        Self {
            field,
            reason: Reason::Malformed,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{op}: {field} already exists")]
    Duplicate { op: &'static str, field: Field },

    #[error("{op}: user {id} not found")]
    NotFound { op: &'static str, id: Uuid },

    #[error("create table {table}")]
    Schema {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("{op}")]
    Database {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// A stored row could not be decoded into a `User`.
    #[error("stored {field} value {value:?} is not valid")]
    Corrupt { field: Field, value: String },
}

impl StoreError {
    /// The field a validation or uniqueness failure refers to, if any.
    pub fn field(&self) -> Option<Field> {
        match self {
            StoreError::Validation(e) => Some(e.field),
            StoreError::Duplicate { field, .. } | StoreError::Corrupt { field, .. } => Some(*field),
            _ => None,
        }
    }

    /// Classify a failed statement on `table`, turning violations of its
    /// unique constraints into `Duplicate`.
    pub(crate) fn from_sqlx(op: &'static str, table: &str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                if let Some(field) = db_err
                    .constraint()
                    .and_then(|name| constraint_field(table, name))
                {
                    return StoreError::Duplicate { op, field };
                }
            }
        }
        StoreError::Database { op, source: err }
    }
}

/// Map a constraint name created by `ensure_schema` back to its column.
/// Postgres folds the unquoted table name to lowercase.
fn constraint_field(table: &str, constraint: &str) -> Option<Field> {
    let table = table.to_ascii_lowercase();
    [Field::Id, Field::Email, Field::Phone]
        .into_iter()
        .find(|field| constraint == constraint_name(&table, *field))
}

pub(crate) fn constraint_name(table: &str, field: Field) -> String {
    match field {
        Field::Id => format!("{table}_pkey"),
        other => format!("{table}_{other}_key"),
    }
}
