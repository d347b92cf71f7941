//! 主应用程序入口
//!
//! 加载配置，选择存储后端，启动 Axum HTTP 与 WebSocket 服务。

use std::sync::Arc;

use anyhow::Context;
use application::MemoryStore;
use config::{AppConfig, StorageBackend};
use infrastructure::{create_pg_pool, BcryptPasswordHasher, PgStorage, MIGRATOR};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, Repositories};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，未设置 RUST_LOG 时默认 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let repositories = open_storage(&config).await?;
    let password_hasher = Arc::new(BcryptPasswordHasher::new(config.server.bcrypt_cost));

    let state = AppState::assemble(&config, repositories, password_hasher);
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, storage = ?config.storage, "chatrix listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

/// `APP_ENV=production` 时严格读取并校验，否则使用开发默认值
fn load_config() -> anyhow::Result<AppConfig> {
    let production = std::env::var("APP_ENV")
        .map(|env| env.eq_ignore_ascii_case("production"))
        .unwrap_or(false);

    let config = if production {
        AppConfig::from_env().context("failed to load configuration")?
    } else {
        tracing::warn!("APP_ENV is not production, using development defaults");
        AppConfig::from_env_with_defaults()
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn open_storage(config: &AppConfig) -> anyhow::Result<Repositories> {
    match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage, data is lost on restart");
            let store = MemoryStore::new();
            Ok(Repositories {
                users: Arc::new(store.clone()),
                conversations: Arc::new(store.clone()),
                messages: Arc::new(store),
            })
        }
        StorageBackend::Postgres => {
            let pool = create_pg_pool(
                &config.database.url,
                config.database.max_connections,
                config.database.min_connections,
            )
            .await
            .context("failed to connect to postgres")?;

            MIGRATOR
                .run(&pool)
                .await
                .context("failed to run migrations")?;
            tracing::info!("migrations applied");

            let storage = PgStorage::new(pool);
            Ok(Repositories {
                users: storage.user_repository,
                conversations: storage.conversation_repository,
                messages: storage.message_repository,
            })
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
