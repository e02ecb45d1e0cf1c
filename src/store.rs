 use std::path::Path;
 use std::sync::Arc;

 use anyhow::{Context, Result};
 use async_trait::async_trait;
 use chrono::{DateTime, Utc};
 use rusqlite::{params, Connection, Row};

 use crate::{
     chain::{OptionContract, OptionType},
     config::{Settings, StoreTarget},
     rest_store::RestStore,
     utils::ts_text,
 };

 /// Persistence surface for the option chain table. Writes are keyed upserts
 /// on `contract_id`; reads serve the dashboard's chain and maturity views.
 #[async_trait]
 pub trait ChainStore: Send + Sync {
     /// Bulk upsert; existing rows with the same `contract_id` are fully overwritten.
     async fn upsert_contracts(&self, rows: &[OptionContract]) -> Result<()>;

     /// Contracts for one symbol and expiration, strike ascending.
     async fn fetch_chain(&self, symbol: &str, expiration: &str) -> Result<Vec<OptionContract>>;

     /// Distinct, non-null expirations for a symbol, ascending.
     async fn fetch_expirations(&self, symbol: &str) -> Result<Vec<String>>;

     fn describe(&self) -> String;
 }

 pub fn open_store(settings: &Settings) -> Result<Arc<dyn ChainStore>> {
     match settings.store_target() {
         StoreTarget::Rest(url) => Ok(Arc::new(RestStore::new(
             &url,
             &settings.database_key,
             &settings.options_table,
             settings.http_timeout_secs,
         )?)),
         StoreTarget::Sqlite(path) => {
             let store = SqliteStore::new(&path, &settings.options_table)?;
             store.init_db()?;
             Ok(Arc::new(store))
         }
     }
 }

 #[derive(Clone)]
 pub struct SqliteStore {
     path: String,
     table: String,
 }

 impl SqliteStore {
     pub fn new(path: &str, table: &str) -> Result<Self> {
         if path.trim().is_empty() {
             anyhow::bail!("sqlite path is empty");
         }
         if path != ":memory:" && !path.starts_with("file:") {
             if let Some(parent) = Path::new(path).parent() {
                 std::fs::create_dir_all(parent)
                     .with_context(|| format!("create sqlite parent dir for {path}"))?;
             }
         }

         // rusqlite::Connection is not Send/Sync. Keep only the path and open
         // short-lived connections per operation.
         Ok(Self {
             path: path.to_string(),
             table: table.to_string(),
         })
     }

     pub fn path(&self) -> &str {
         &self.path
     }

     fn open_conn(&self) -> Result<Connection> {
         let conn = Connection::open(&self.path).with_context(|| format!("open sqlite {}", self.path))?;
         conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
         Ok(conn)
     }

     pub fn init_db(&self) -> Result<()> {
         let conn = self.open_conn()?;
         let t = &self.table;
         conn.execute_batch(&format!(
             r#"
 CREATE TABLE IF NOT EXISTS {t} (
   contract_id TEXT PRIMARY KEY,
   symbol TEXT NOT NULL,
   option_type TEXT NOT NULL,
   strike REAL NOT NULL,
   expiration_date TEXT,
   bid REAL,
   ask REAL,
   last REAL,
   mark REAL,
   volume REAL,
   open_interest REAL,
   implied_vol REAL,
   delta REAL,
   gamma REAL,
   theta REAL,
   vega REAL,
   rho REAL,
   updated_at TEXT NOT NULL
 );

 CREATE INDEX IF NOT EXISTS idx_{t}_chain ON {t}(symbol, expiration_date, strike);
 "#
         ))
         .with_context(|| format!("create table {t}"))?;
         Ok(())
     }

     pub fn upsert_contracts_sync(&self, rows: &[OptionContract]) -> Result<()> {
         let mut conn = self.open_conn()?;
         let tx = conn.transaction()?;
         {
             let mut stmt = tx.prepare(&format!(
                 r#"
 INSERT INTO {}(
   contract_id, symbol, option_type, strike, expiration_date,
   bid, ask, last, mark, volume, open_interest,
   implied_vol, delta, gamma, theta, vega, rho, updated_at
 )
 VALUES(?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
 ON CONFLICT(contract_id) DO UPDATE SET
   symbol=excluded.symbol,
   option_type=excluded.option_type,
   strike=excluded.strike,
   expiration_date=excluded.expiration_date,
   bid=excluded.bid,
   ask=excluded.ask,
   last=excluded.last,
   mark=excluded.mark,
   volume=excluded.volume,
   open_interest=excluded.open_interest,
   implied_vol=excluded.implied_vol,
   delta=excluded.delta,
   gamma=excluded.gamma,
   theta=excluded.theta,
   vega=excluded.vega,
   rho=excluded.rho,
   updated_at=excluded.updated_at
 "#,
                 self.table
             ))?;
             for r in rows {
                 stmt.execute(params![
                     r.contract_id,
                     r.symbol,
                     r.option_type.as_str(),
                     r.strike,
                     r.expiration_date,
                     r.bid,
                     r.ask,
                     r.last,
                     r.mark,
                     r.volume,
                     r.open_interest,
                     r.implied_vol,
                     r.delta,
                     r.gamma,
                     r.theta,
                     r.vega,
                     r.rho,
                     ts_text(&r.updated_at)
                 ])
                 .with_context(|| format!("upsert {}", r.contract_id))?;
             }
         }
         tx.commit()?;
         Ok(())
     }

     pub fn fetch_chain_sync(&self, symbol: &str, expiration: &str) -> Result<Vec<OptionContract>> {
         let conn = self.open_conn()?;
         let mut stmt = conn.prepare(&format!(
             r#"
 SELECT contract_id, symbol, option_type, strike, expiration_date,
        bid, ask, last, mark, volume, open_interest,
        implied_vol, delta, gamma, theta, vega, rho, updated_at
 FROM {}
 WHERE symbol = ? AND expiration_date = ?
 ORDER BY strike ASC, contract_id ASC
 "#,
             self.table
         ))?;
         let mut rows = stmt.query(params![symbol, expiration])?;
         let mut out = vec![];
         while let Some(r) = rows.next()? {
             out.push(contract_from_row(r)?);
         }
         Ok(out)
     }

     pub fn fetch_expirations_sync(&self, symbol: &str) -> Result<Vec<String>> {
         let conn = self.open_conn()?;
         let mut stmt = conn.prepare(&format!(
             r#"
 SELECT DISTINCT expiration_date
 FROM {}
 WHERE symbol = ? AND expiration_date IS NOT NULL AND expiration_date <> ''
 ORDER BY expiration_date ASC
 "#,
             self.table
         ))?;
         let mut rows = stmt.query(params![symbol])?;
         let mut out = vec![];
         while let Some(r) = rows.next()? {
             out.push(r.get::<_, String>(0)?);
         }
         Ok(out)
     }

     #[cfg(test)]
     pub fn count_contracts(&self) -> Result<i64> {
         let conn = self.open_conn()?;
         let n = conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |r| r.get(0))?;
         Ok(n)
     }

     #[cfg(test)]
     pub fn fetch_contract(&self, contract_id: &str) -> Result<Option<OptionContract>> {
         use rusqlite::OptionalExtension;

         let conn = self.open_conn()?;
         let mut stmt = conn.prepare(&format!(
             r#"
 SELECT contract_id, symbol, option_type, strike, expiration_date,
        bid, ask, last, mark, volume, open_interest,
        implied_vol, delta, gamma, theta, vega, rho, updated_at
 FROM {}
 WHERE contract_id = ?
 "#,
             self.table
         ))?;
         let row = stmt
             .query_row(params![contract_id], |r| Ok(contract_from_row(r)))
             .optional()?
             .transpose()?;
         Ok(row)
     }
 }

 fn contract_from_row(r: &Row<'_>) -> Result<OptionContract> {
     let option_type: String = r.get(2)?;
     let updated_at: String = r.get(17)?;
     Ok(OptionContract {
         contract_id: r.get(0)?,
         symbol: r.get(1)?,
         option_type: option_type.parse::<OptionType>()?,
         strike: r.get(3)?,
         expiration_date: r.get(4)?,
         bid: r.get(5)?,
         ask: r.get(6)?,
         last: r.get(7)?,
         mark: r.get(8)?,
         volume: r.get(9)?,
         open_interest: r.get(10)?,
         implied_vol: r.get(11)?,
         delta: r.get(12)?,
         gamma: r.get(13)?,
         theta: r.get(14)?,
         vega: r.get(15)?,
         rho: r.get(16)?,
         updated_at: DateTime::parse_from_rfc3339(&updated_at)
             .with_context(|| format!("bad updated_at {updated_at}"))?
             .with_timezone(&Utc),
     })
 }

 #[async_trait]
 impl ChainStore for SqliteStore {
     async fn upsert_contracts(&self, rows: &[OptionContract]) -> Result<()> {
         self.upsert_contracts_sync(rows)
     }

     async fn fetch_chain(&self, symbol: &str, expiration: &str) -> Result<Vec<OptionContract>> {
         self.fetch_chain_sync(symbol, expiration)
     }

     async fn fetch_expirations(&self, symbol: &str) -> Result<Vec<String>> {
         self.fetch_expirations_sync(symbol)
     }

     fn describe(&self) -> String {
         format!("sqlite:{}#{}", self.path(), self.table)
     }
 }
