use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{validate_table_name, StoreConfig};
use crate::error::{StoreError, ValidationError};
use crate::users::repo_types::{NewUser, Role, User, UserRow};
use crate::users::validate::{
    validate_email, validate_id, validate_password_hash, validate_phone, validate_role,
};

const COLUMNS: &str = "id, email, password, phone, role, created_at, updated_at";

/// Validated CRUD access to one users table.
///
/// Cloning is cheap and shares the underlying pool.
#[derive(Clone)]
pub struct UserStore {
    db: PgPool,
    table: String,
}

impl UserStore {
    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options()?)
            .await
            .context("connect to database")?;
        Self::from_pool(db, config.table.clone())
    }

    pub fn from_pool(db: PgPool, table: impl Into<String>) -> anyhow::Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { db, table })
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(self) {
        self.db.close().await;
    }

    /// Insert a user, generating the id when the caller did not supply one.
    #[instrument(skip(self, new), fields(table = %self.table))]
    pub async fn insert(&self, new: &NewUser) -> Result<User, StoreError> {
        const OP: &str = "insert";
        let email = checked(OP, validate_email(&new.email))?;
        let password = checked(OP, validate_password_hash(&new.password))?;
        let phone = checked(OP, validate_phone(&new.phone))?;
        let id = match new.id.as_deref() {
            Some(id) if !id.is_empty() => checked(OP, validate_id(id))?,
            _ => Uuid::new_v4(),
        };

        let sql = format!(
            "INSERT INTO {} (id, email, password, phone) VALUES ($1, $2, $3, $4) RETURNING {COLUMNS}",
            self.table
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(email)
            .bind(password)
            .bind(phone)
            .fetch_one(&self.db)
            .await
            .map_err(|e| self.failed(OP, e))?;

        let user = User::try_from(row)?;
        info!(user_id = %user.id, "user inserted");
        Ok(user)
    }

    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn get_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        const OP: &str = "get_by_id";
        let id = checked(OP, validate_id(id))?;

        let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = $1", self.table);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| self.failed(OP, e))?;

        debug!(found = row.is_some(), "lookup by id");
        row.map(User::try_from).transpose()
    }

    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        const OP: &str = "get_by_email";
        let email = checked(OP, validate_email(email))?;
        self.find_by_text(OP, "email", email).await
    }

    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn get_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        const OP: &str = "get_by_phone";
        let phone = checked(OP, validate_phone(phone))?;
        self.find_by_text(OP, "phone", phone).await
    }

    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn update_email(&self, id: &str, email: &str) -> Result<User, StoreError> {
        const OP: &str = "update_email";
        let id = checked(OP, validate_id(id))?;
        let email = checked(OP, validate_email(email))?;
        self.update_column(OP, id, "email", email).await
    }

    #[instrument(skip(self, password), fields(table = %self.table))]
    pub async fn update_password(&self, id: &str, password: &str) -> Result<User, StoreError> {
        const OP: &str = "update_password";
        let id = checked(OP, validate_id(id))?;
        let password = checked(OP, validate_password_hash(password))?;
        self.update_column(OP, id, "password", password).await
    }

    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn update_phone(&self, id: &str, phone: &str) -> Result<User, StoreError> {
        const OP: &str = "update_phone";
        let id = checked(OP, validate_id(id))?;
        let phone = checked(OP, validate_phone(phone))?;
        self.update_column(OP, id, "phone", phone).await
    }

    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn update_role(&self, id: &str, role: &str) -> Result<User, StoreError> {
        const OP: &str = "update_role";
        let id = checked(OP, validate_id(id))?;
        let role: Role = checked(OP, validate_role(role))?;
        self.update_column(OP, id, "role", role.as_str()).await
    }

    /// Returns the number of rows removed; zero means there was nothing to delete.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn delete_by_id(&self, id: &str) -> Result<u64, StoreError> {
        const OP: &str = "delete_by_id";
        let id = checked(OP, validate_id(id))?;

        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let removed = sqlx::query(&sql)
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| self.failed(OP, e))?
            .rows_affected();

        info!(user_id = %id, removed, "user deleted");
        Ok(removed)
    }

    async fn find_by_text(
        &self,
        op: &'static str,
        column: &'static str,
        value: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE {column} = $1", self.table);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| self.failed(op, e))?;

        debug!(column, found = row.is_some(), "lookup");
        row.map(User::try_from).transpose()
    }

    /// Single-row update; every column other than `column` and `updated_at` is left as stored.
    async fn update_column(
        &self,
        op: &'static str,
        id: Uuid,
        column: &'static str,
        value: &str,
    ) -> Result<User, StoreError> {
        // updated_at must move forward even when two updates share a clock tick.
        let sql = format!(
            "UPDATE {} SET {column} = $2, \
             updated_at = GREATEST(clock_timestamp(), updated_at + interval '1 microsecond') \
             WHERE id = $1 RETURNING {COLUMNS}",
            self.table
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| self.failed(op, e))?;

        let Some(row) = row else {
            warn!(user_id = %id, op, "update target not found");
            return Err(StoreError::NotFound { op, id });
        };
        let user = User::try_from(row)?;
        info!(user_id = %user.id, column, "user updated");
        Ok(user)
    }

    fn failed(&self, op: &'static str, err: sqlx::Error) -> StoreError {
        let err = StoreError::from_sqlx(op, &self.table, err);
        match &err {
            StoreError::Duplicate { field, .. } => {
                warn!(op, field = %field, "unique constraint violated")
            }
            StoreError::Database { source, .. } => error!(op, error = %source, "query failed"),
            _ => {}
        }
        err
    }
}

fn checked<T>(op: &'static str, result: Result<T, ValidationError>) -> Result<T, StoreError> {
    result.map_err(|e| {
        warn!(op, field = %e.field, reason = %e.reason, "input rejected");
        StoreError::Validation(e)
    })
}
