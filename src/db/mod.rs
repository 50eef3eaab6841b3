use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

pub mod models;

/// Creates a SQLite connection pool, runs pending migrations, and configures
/// per-connection pragmas (WAL mode, foreign key enforcement, a busy
/// timeout).
///
/// The busy timeout matters for the job queue's claim strategy (§4.4): with
/// no `SELECT ... FOR UPDATE SKIP LOCKED` in SQLite, concurrent workers rely
/// on SQLite's own writer-lock queueing rather than an application-level
/// skip-locked scan, so a writer that finds the database locked should wait
/// briefly instead of failing immediately.
///
/// `database_url` should be a SQLite connection string such as
/// `sqlite:data/lumilio.db?mode=rwc`.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    // Apply all pending migrations from the ./migrations directory. The
    // macro embeds migration files at compile time so the binary is
    // self-contained.
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
