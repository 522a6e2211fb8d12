use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use sqlx::postgres::PgConnectOptions;

lazy_static! {
    // Leaves room for constraint suffixes within the 63 byte identifier limit.
    static ref IDENT_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,47}$").unwrap();
}

/// Where the users table lives and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    Url(String),
    Parts {
        host: String,
        port: u16,
        database: String,
        user: Option<String>,
        password: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub target: ConnectTarget,
    pub table: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            target: ConnectTarget::Parts {
                host: "localhost".into(),
                port: 5432,
                database: "localhost_db".into(),
                user: None,
                password: None,
            },
            table: "users".into(),
            max_connections: 10,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let target = match var("DATABASE_URL") {
            Some(url) => ConnectTarget::Url(url),
            None => ConnectTarget::Parts {
                host: var("PGHOST").unwrap_or_else(|| "localhost".into()),
                port: var("PGPORT")
                    .map(|v| v.parse::<u16>())
                    .transpose()
                    .context("PGPORT must be a port number")?
                    .unwrap_or(5432),
                database: var("PGDATABASE").unwrap_or_else(|| "localhost_db".into()),
                user: credential(var("PGUSER")),
                password: credential(var("PGPASSWORD")),
            },
        };

        let table = var("USERS_TABLE").unwrap_or(defaults.table);
        validate_table_name(&table)?;

        let max_connections = var("DB_MAX_CONNECTIONS")
            .map(|v| v.parse::<u32>())
            .transpose()
            .context("DB_MAX_CONNECTIONS must be a positive integer")?
            .unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be at least 1");
        }

        Ok(Self {
            target,
            table,
            max_connections,
        })
    }

    pub fn connect_options(&self) -> anyhow::Result<PgConnectOptions> {
        match &self.target {
            ConnectTarget::Url(url) => url.parse().context("parse DATABASE_URL"),
            ConnectTarget::Parts {
                host,
                port,
                database,
                user,
                password,
            } => {
                let mut opts = PgConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .database(database);
                if let Some(user) = user {
                    opts = opts.username(user);
                }
                if let Some(password) = password {
                    opts = opts.password(password);
                }
                Ok(opts)
            }
        }
    }
}

/// Empty values and the literal string "null" mean "not provided".
fn credential(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty() && v != "null")
}

/// The table name is interpolated into SQL, so only plain identifiers pass.
pub fn validate_table_name(table: &str) -> anyhow::Result<()> {
    if IDENT_RE.is_match(table) {
        Ok(())
    } else {
        anyhow::bail!("invalid table name {table:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_local_database() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.target, StoreConfig::default().target);
        assert_eq!(config.table, "users");
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn database_url_wins_over_parts() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://app:secret@db:5433/accounts"),
            ("PGHOST", "ignored"),
        ]))
        .unwrap();
        assert_eq!(
            config.target,
            ConnectTarget::Url("postgres://app:secret@db:5433/accounts".into())
        );
        assert!(config.connect_options().is_ok());
    }

    #[test]
    fn null_credentials_are_dropped() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("PGHOST", "pg.internal"),
            ("PGPORT", "6543"),
            ("PGUSER", "null"),
            ("PGPASSWORD", ""),
        ]))
        .unwrap();
        match config.target {
            ConnectTarget::Parts {
                host,
                port,
                user,
                password,
                ..
            } => {
                assert_eq!(host, "pg.internal");
                assert_eq!(port, 6543);
                assert_eq!(user, None);
                assert_eq!(password, None);
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn bad_port_is_an_error() {
        let err = StoreConfig::from_lookup(lookup(&[("PGPORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("PGPORT"));
    }

    #[test]
    fn max_connections_is_parsed_strictly() {
        let config = StoreConfig::from_lookup(lookup(&[("DB_MAX_CONNECTIONS", "25")])).unwrap();
        assert_eq!(config.max_connections, 25);

        let err = StoreConfig::from_lookup(lookup(&[("DB_MAX_CONNECTIONS", "lots")])).unwrap_err();
        assert!(err.to_string().contains("DB_MAX_CONNECTIONS"));
        let err = StoreConfig::from_lookup(lookup(&[("DB_MAX_CONNECTIONS", "0")])).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn table_name_must_be_identifier() {
        for ok in ["users", "app_users", "_t1"] {
            assert!(validate_table_name(ok).is_ok(), "{ok}");
        }
        let long = "u".repeat(49);
        for bad in ["", "1users", "users; DROP TABLE x", "public.users", "u-s", long.as_str()] {
            assert!(validate_table_name(bad).is_err(), "{bad}");
        }
        assert!(StoreConfig::from_lookup(lookup(&[("USERS_TABLE", "bad name")])).is_err());
    }
}
