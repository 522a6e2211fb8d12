use usersdb::{SchemaStatus, StoreConfig, UserStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "usersdb=debug,sqlx=warn".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = StoreConfig::from_env()?;
    let store = UserStore::connect(&config).await?;

    let status = store.ensure_schema().await;
    store.close().await;

    match status? {
        SchemaStatus::Created => tracing::info!(table = %config.table, "users table created"),
        SchemaStatus::Exists => tracing::info!(table = %config.table, "users table already present"),
    }
    Ok(())
}
