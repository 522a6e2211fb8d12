//! Validated persistence for user accounts in PostgreSQL.
//!
//! [`UserStore`] provisions a users table and exposes lookups and
//! field-by-field updates. Every input is validated before a statement is
//! sent; uniqueness of email and phone is left to the database.

pub mod config;
pub mod error;
pub mod users;

pub use config::StoreConfig;
pub use error::{Field, StoreError, ValidationError};
pub use users::{NewUser, Role, SchemaStatus, User, UserStore};
