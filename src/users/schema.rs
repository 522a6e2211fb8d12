use tracing::{error, info, instrument};

use crate::error::{constraint_name, Field, StoreError};
use crate::users::repo::UserStore;
use crate::users::repo_types::Role;

/// Outcome of `UserStore::ensure_schema`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    Exists,
    Created,
}

/// Only an ordinary or partitioned table counts; a view, index or sequence
/// under the same name does not.
const TABLE_EXISTS_SQL: &str = "SELECT EXISTS (\
     SELECT 1 FROM pg_class WHERE oid = to_regclass($1::text) AND relkind IN ('r', 'p'))";

/// SQLSTATE duplicate_table.
const DUPLICATE_TABLE: &str = "42P07";
/// Raised instead of 42P07 when two sessions create the same table at once.
const PG_TYPE_NAME_INDEX: &str = "pg_type_typname_nsp_index";

pub(crate) fn create_table_sql(table: &str) -> String {
    let pkey = constraint_name(table, Field::Id);
    let email_key = constraint_name(table, Field::Email);
    let phone_key = constraint_name(table, Field::Phone);
    let roles = Role::ALL
        .iter()
        .map(|r| format!("'{}'", r.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"
        CREATE TABLE {table} (
            id          UUID         NOT NULL,
            email       VARCHAR(255) NOT NULL,
            password    VARCHAR(255) NOT NULL,
            phone       VARCHAR(255) NOT NULL,
            role        TEXT         NOT NULL DEFAULT '{default_role}',
            created_at  TIMESTAMPTZ  NOT NULL DEFAULT now(),
            updated_at  TIMESTAMPTZ  NOT NULL DEFAULT now(),
            CONSTRAINT {pkey} PRIMARY KEY (id),
            CONSTRAINT {email_key} UNIQUE (email),
            CONSTRAINT {phone_key} UNIQUE (phone),
            CONSTRAINT {table}_role_check CHECK (role IN ({roles})),
            CONSTRAINT {table}_timestamps_check CHECK (updated_at >= created_at)
        )
        "#,
        default_role = Role::default(),
    )
}

pub(crate) fn create_password_index_sql(table: &str) -> String {
    format!("CREATE INDEX {table}_password_idx ON {table} (password)")
}

fn lost_create_race(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(DUPLICATE_TABLE)
                || (db_err.is_unique_violation()
                    && db_err.constraint() == Some(PG_TYPE_NAME_INDEX))
        }
        _ => false,
    }
}

impl UserStore {
    /// Create the users table and its indexes unless it already exists.
    #[instrument(skip(self), fields(table = %self.table()))]
    pub async fn ensure_schema(&self) -> Result<SchemaStatus, StoreError> {
        let schema_err = |source: sqlx::Error| StoreError::Schema {
            table: self.table().to_string(),
            source,
        };

        if self.table_exists().await.map_err(schema_err)? {
            info!("table exists");
            return Ok(SchemaStatus::Exists);
        }

        let result = async {
            let mut tx = self.pool().begin().await?;
            sqlx::query(&create_table_sql(self.table()))
                .execute(&mut *tx)
                .await?;
            sqlx::query(&create_password_index_sql(self.table()))
                .execute(&mut *tx)
                .await?;
            tx.commit().await
        }
        .await;

        let err = match result {
            Ok(()) => {
                info!("table created");
                return Ok(SchemaStatus::Created);
            }
            Err(e) => e,
        };

        // The name may also be held by a relation that is not a table.
        if lost_create_race(&err) && self.table_exists().await.unwrap_or(false) {
            info!("table created concurrently");
            return Ok(SchemaStatus::Exists);
        }
        error!(error = %err, "create table failed");
        Err(schema_err(err))
    }

    async fn table_exists(&self) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(TABLE_EXISTS_SQL)
            .bind(self.table())
            .fetch_one(self.pool())
            .await
    }
}
