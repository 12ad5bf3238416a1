use crate::errors::{EngineError, EngineResult};
use crate::models::calibration::DistributionParameters;
use crate::state::DbCommand;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type DbPool = Arc<Mutex<Connection>>;

/// Lookup of fitted distribution parameters by ticker. Lookups are
/// case-insensitive; absence is `Ok(None)`, never a fallback to another ticker.
pub trait DistributionStore: Send + Sync {
    fn by_ticker(&self, symbol: &str) -> EngineResult<Option<DistributionParameters>>;
}

#[inline]
pub fn ticker_key(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

pub fn init_db(data_dir: &Path) -> EngineResult<DbPool> {
    std::fs::create_dir_all(data_dir).map_err(|e| EngineError::Database(format!("create dir: {e}")))?;
    let db_path = data_dir.join("fat_tails.db");
    let conn = Connection::open(&db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    migrate(&conn)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

/// Fresh in-memory database with the schema applied.
#[cfg(test)]
pub fn open_in_memory() -> EngineResult<DbPool> {
    let conn = Connection::open_in_memory()?;
    migrate(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn migrate(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(include_str!("../migrations/001_init.sql"))?;
    Ok(())
}

/// Dedicated DB writer task. Reads commands from bounded channel, executes SQL.
/// Reads take the lock directly from the request path.
pub async fn run_db_writer(db: DbPool, mut rx: mpsc::Receiver<DbCommand>) {
    tracing::info!("db writer task started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            DbCommand::UpsertParams { ticker, params, reply } => {
                let result = upsert_params(&db, &ticker, &params);
                if let Err(e) = &result {
                    tracing::error!(ticker = %ticker, error = %e, "params upsert failed");
                }
                let _ = reply.send(result);
            }
        }
    }

    tracing::info!("db writer task shutting down");
}

fn validate_params(params: &DistributionParameters) -> EngineResult<()> {
    let ok = params.degrees_of_freedom.is_finite()
        && params.degrees_of_freedom > 0.0
        && params.location_drift.is_finite()
        && params.historical_scale.is_finite()
        && params.historical_scale > 0.0;
    if !ok {
        return Err(EngineError::InvalidRequest(format!(
            "distribution parameters out of range: {params:?}"
        )));
    }
    Ok(())
}

pub fn upsert_params(db: &DbPool, ticker: &str, params: &DistributionParameters) -> EngineResult<()> {
    validate_params(params)?;
    let key = ticker_key(ticker);
    if key.is_empty() {
        return Err(EngineError::InvalidRequest("ticker must not be empty".into()));
    }
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock poisoned: {e}")))?;
    conn.execute(
        "INSERT INTO distribution_params (ticker, degrees_of_freedom, location_drift, historical_scale, updated_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))
         ON CONFLICT(ticker) DO UPDATE SET
            degrees_of_freedom = excluded.degrees_of_freedom,
            location_drift = excluded.location_drift,
            historical_scale = excluded.historical_scale,
            updated_at = excluded.updated_at",
        rusqlite::params![key, params.degrees_of_freedom, params.location_drift, params.historical_scale],
    )?;
    Ok(())
}

// ── Query helpers (cold path: REST reads and simulation request building) ──

pub fn get_params(db: &DbPool, ticker: &str) -> EngineResult<Option<DistributionParameters>> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock: {e}")))?;
    let row = conn
        .query_row(
            "SELECT degrees_of_freedom, location_drift, historical_scale FROM distribution_params WHERE ticker = ?1",
            rusqlite::params![ticker_key(ticker)],
            |row| {
                Ok(DistributionParameters {
                    degrees_of_freedom: row.get(0)?,
                    location_drift: row.get(1)?,
                    historical_scale: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn list_params(db: &DbPool) -> EngineResult<Vec<ParamsRow>> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock: {e}")))?;
    let mut stmt = conn.prepare(
        "SELECT ticker, degrees_of_freedom, location_drift, historical_scale, updated_at FROM distribution_params ORDER BY ticker",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ParamsRow {
            ticker: row.get(0)?,
            params: DistributionParameters {
                degrees_of_freedom: row.get(1)?,
                location_drift: row.get(2)?,
                historical_scale: row.get(3)?,
            },
            updated_at: row.get(4)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

impl DistributionStore for DbPool {
    fn by_ticker(&self, symbol: &str) -> EngineResult<Option<DistributionParameters>> {
        get_params(self, symbol)
    }
}

/// Map-backed store for tests. Keys are normalized on insert.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(std::collections::HashMap<String, DistributionParameters>);

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, ticker: &str, params: DistributionParameters) -> Self {
        self.0.insert(ticker_key(ticker), params);
        self
    }
}

#[cfg(test)]
impl DistributionStore for MemoryStore {
    fn by_ticker(&self, symbol: &str) -> EngineResult<Option<DistributionParameters>> {
        Ok(self.0.get(&ticker_key(symbol)).copied())
    }
}

// ── Row types ──

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsRow {
    pub ticker: String,
    #[serde(flatten)]
    pub params: DistributionParameters,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn spy() -> DistributionParameters {
        DistributionParameters { degrees_of_freedom: 4.2, location_drift: 0.0003, historical_scale: 0.0082 }
    }

    #[test]
    fn test_sqlite_roundtrip_case_insensitive() {
        let db = open_in_memory().unwrap();
        assert_eq!(db.by_ticker("SPY").unwrap(), None);

        upsert_params(&db, "spy", &spy()).unwrap();
        assert_eq!(db.by_ticker("SPY").unwrap(), Some(spy()));
        assert_eq!(db.by_ticker(" Spy ").unwrap(), Some(spy()));
        assert_eq!(db.by_ticker("QQQ").unwrap(), None);

        let updated = DistributionParameters { degrees_of_freedom: 3.1, ..spy() };
        upsert_params(&db, "SPY", &updated).unwrap();
        let rows = list_params(&db).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ticker, "SPY");
        assert_eq!(rows[0].params, updated);
    }

    #[test]
    fn test_rejects_invalid_params() {
        let db = open_in_memory().unwrap();
        let bad = DistributionParameters { historical_scale: 0.0, ..spy() };
        assert!(upsert_params(&db, "SPY", &bad).is_err());
        assert!(upsert_params(&db, "  ", &spy()).is_err());
        assert!(list_params(&db).unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_normalizes_keys() {
        let store = MemoryStore::new().with("aapl", spy());
        assert_eq!(store.by_ticker("AAPL").unwrap(), Some(spy()));
        assert_eq!(store.by_ticker("MSFT").unwrap(), None);
    }

    #[tokio::test]
    async fn test_writer_task_replies() {
        let db = open_in_memory().unwrap();
        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(run_db_writer(db.clone(), rx));

        let (reply, done) = oneshot::channel();
        tx.send(DbCommand::UpsertParams { ticker: "iwm".into(), params: spy(), reply }).await.unwrap();
        done.await.unwrap().unwrap();
        assert_eq!(db.by_ticker("IWM").unwrap(), Some(spy()));

        drop(tx);
        writer.await.unwrap();
    }
}
