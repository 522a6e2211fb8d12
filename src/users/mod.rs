pub mod repo;
pub mod repo_types;
pub mod schema;
pub mod validate;

pub use repo::UserStore;
pub use repo_types::{NewUser, Role, User};
pub use schema::SchemaStatus;
