mod from_row;
pub mod queries;
mod schema;

pub use from_row::FromRow;
pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::billing::WebhookSettings;
use crate::error::Result;
use crate::payments::PaymentGateway;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Frontend base URL (no trailing slash) for checkout redirects
    pub frontend_url: String,
    pub gateway: Arc<dyn PaymentGateway>,
    pub webhooks: WebhookSettings,
}

/// Open a pooled SQLite database at `path` and make sure the schema exists.
///
/// Every pooled connection gets foreign keys and WAL enabled.
pub fn create_pool(path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
    });
    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    init_db(&conn)?;

    Ok(pool)
}
