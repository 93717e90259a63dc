use sqlx::{Sqlite, SqlitePool, migrate::MigrateDatabase, sqlite::SqlitePoolOptions};
use std::fs::File;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use treenode_core::config::Config;
use treenode_core::node::TreeRepository;
use treenode_core::position::Position;

use crate::category::CategoryNode;
use crate::config::AppConfig;

async fn init_sqlite_db(config: &AppConfig) -> anyhow::Result<SqlitePool> {
    let database_url = &config.database_url;

    if !Sqlite::database_exists(database_url).await? {
        tracing::info!("Creating SQLite database at: {}", database_url);
        Sqlite::create_database(database_url).await?;
    }

    tracing::info!("Connecting to SQLite database");
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    tracing::info!("Running SQLite migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

fn init_tracing(write_log_to_file: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "treenode_demo=debug".into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_level(true)
        .pretty();

    let registry = tracing_subscriber::registry().with(filter).with(console_layer);

    if write_log_to_file {
        let file = File::create("app.log").expect("cannot create log file");
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(file)
            .with_current_span(true)
            .with_span_list(true);
        registry.with(json_layer).try_init().ok();
    } else {
        registry.try_init().ok();
    }
}

/// Builds a small catalog tree and walks a handful of the engine's
/// operations against it, logging what each one returns. This stands in
/// for the HTTP surface the teacher's `create_app` would have built — this
/// crate is a library demo, not a service.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    init_tracing(config.write_log_to_file);

    let pool = init_sqlite_db(&config).await?;
    let repo = TreeRepository::<CategoryNode>::new(pool, Config::default(), "categories");

    let electronics = repo.add_root(&CategoryNode::named("Electronics"), Position::LastRoot).await?;
    let phones = repo.add_child(electronics, &CategoryNode::named("Phones")).await?;
    let laptops = repo.add_child(electronics, &CategoryNode::named("Laptops")).await?;
    let accessories = repo
        .add_sibling(laptops, &CategoryNode::named("Accessories"), Position::RightSibling)
        .await?;

    tracing::info!(
        electronics, phones, laptops, accessories,
        "seeded catalog"
    );

    let children = repo.children(Some(electronics)).await?;
    tracing::info!(?children, "children of Electronics");

    let ancestors = repo.ancestors(phones, true).await?;
    tracing::info!(?ancestors, "ancestors of Phones (including self)");

    repo.move_to(accessories, phones, Position::LastChild).await?;
    let phone_children = repo.children(Some(phones)).await?;
    tracing::info!(?phone_children, "children of Phones after moving Accessories under it");

    Ok(())
}
