use std::env;
use std::fmt;

use anyhow::{anyhow, bail, Result};

pub const DEFAULT_SYMBOLS: &[&str] = &[
    "SPY", "QQQ", "DIA", "USO", "BNO", "UNG", "GLD", "SLV", "WEAT", "CORN", "MSFT", "ORCL", "CRM",
    "NVDA", "AMD", "AAPL", "GOOGL", "META", "BA", "LMT", "CAT", "GE", "PFE", "JNJ", "MRK", "WMT",
    "AMZN", "TSLA", "NKE", "LULU",
];

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn get_env(env: Lookup, key: &str) -> Option<String> {
    env(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_env_any(env: Lookup, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| get_env(env, k))
}

fn get_env_usize(env: Lookup, key: &str, default: usize) -> Result<usize> {
    match get_env(env, key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<usize>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_u16(env: Lookup, key: &str, default: u16) -> Result<u16> {
    let v = get_env_usize(env, key, default as usize)?;
    u16::try_from(v).map_err(|_| anyhow!("{key} out of range: {v}"))
}

fn get_env_string(env: Lookup, key: &str, default: &str) -> String {
    get_env(env, key).unwrap_or_else(|| default.to_string())
}

fn parse_symbols(s: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for sym in s.split(',').map(|x| x.trim().to_uppercase()).filter(|x| !x.is_empty()) {
        if !out.contains(&sym) {
            out.push(sym);
        }
    }
    out
}

/// Where the `options_chain` table lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    /// PostgREST-compatible hosted database, base URL without `/rest/v1`.
    Rest(String),
    /// Local SQLite file.
    Sqlite(String),
}

#[derive(Clone)]
pub struct Settings {
    // Secrets
    pub database_url: String,
    pub database_key: String,
    pub alpha_vantage_api_key: String,

    // Provider
    pub alpha_vantage_base_url: String,
    pub http_timeout_secs: u64,

    // Ingestion
    pub symbols: Vec<String>,
    pub options_table: String,
    pub ingest_concurrency: usize,

    // Read API
    pub dashboard_host: String,
    pub dashboard_port: u16,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("database_url", &self.database_url)
            .field("database_key", &"<redacted>")
            .field("alpha_vantage_api_key", &"<redacted>")
            .field("alpha_vantage_base_url", &self.alpha_vantage_base_url)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("symbols", &self.symbols)
            .field("options_table", &self.options_table)
            .field("ingest_concurrency", &self.ingest_concurrency)
            .field("dashboard_host", &self.dashboard_host)
            .field("dashboard_port", &self.dashboard_port)
            .finish()
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::from_lookup(&|k: &str| env::var(k).ok())
    }

    /// Secrets and parse errors fail here; `validate` runs once CLI overrides
    /// have been applied.
    pub fn from_lookup(env: Lookup) -> Result<Self> {
        let database_url = get_env_any(env, &["SUPABASE_URL", "DATABASE_URL"]);
        let database_key = get_env_any(env, &["SUPABASE_SERVICE_ROLE_KEY", "DATABASE_SERVICE_KEY"]);
        let alpha_vantage_api_key = get_env(env, "ALPHA_VANTAGE_API_KEY");

        let (Some(database_url), Some(database_key), Some(alpha_vantage_api_key)) =
            (database_url, database_key, alpha_vantage_api_key)
        else {
            bail!("Missing SUPABASE_URL, SUPABASE_SERVICE_ROLE_KEY, or ALPHA_VANTAGE_API_KEY");
        };

        let symbols = match get_env(env, "TRACKED_SYMBOLS") {
            Some(s) => parse_symbols(&s),
            None => DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        };

        let s = Self {
            database_url,
            database_key,
            alpha_vantage_api_key,
            alpha_vantage_base_url: get_env_string(
                env,
                "ALPHA_VANTAGE_BASE_URL",
                "https://www.alphavantage.co/query",
            ),
            http_timeout_secs: get_env_usize(env, "HTTP_TIMEOUT_SECS", 30)? as u64,
            symbols,
            options_table: get_env_string(env, "OPTIONS_TABLE", "options_chain"),
            ingest_concurrency: get_env_usize(env, "INGEST_CONCURRENCY", 1)?,
            dashboard_host: get_env_string(env, "DASHBOARD_HOST", "127.0.0.1"),
            dashboard_port: get_env_u16(env, "DASHBOARD_PORT", 8000)?,
        };
        Ok(s)
    }

    /// Replace the tracked list, e.g. from a `--symbols` flag.
    pub fn override_symbols(&mut self, csv: &str) -> Result<()> {
        let symbols = parse_symbols(csv);
        if symbols.is_empty() {
            bail!("--symbols must name at least one ticker");
        }
        self.symbols = symbols;
        Ok(())
    }

    pub fn store_target(&self) -> StoreTarget {
        let url = self.database_url.trim_end_matches('/');
        if url.starts_with("http://") || url.starts_with("https://") {
            StoreTarget::Rest(url.to_string())
        } else {
            StoreTarget::Sqlite(url.strip_prefix("sqlite:").unwrap_or(url).to_string())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("TRACKED_SYMBOLS must name at least one ticker");
        }
        if self.ingest_concurrency < 1 {
            bail!(
                "INGEST_CONCURRENCY must be >= 1 (got {})",
                self.ingest_concurrency
            );
        }
        if self.http_timeout_secs < 1 {
            bail!(
                "HTTP_TIMEOUT_SECS must be >= 1 (got {})",
                self.http_timeout_secs
            );
        }
        let table_ok = !self.options_table.is_empty()
            && self
                .options_table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !table_ok {
            bail!("OPTIONS_TABLE must be a plain identifier (got {})", self.options_table);
        }
        if let StoreTarget::Sqlite(path) = self.store_target() {
            if path.is_empty() {
                bail!("SUPABASE_URL names an empty sqlite path");
            }
            // Each store operation opens its own connection, so an in-memory
            // database would lose the table between calls.
            if path == ":memory:" || path.contains("mode=memory") || path.starts_with("file::memory:") {
                bail!("SUPABASE_URL must name a sqlite file, not an in-memory database (got {path})");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_settings(database_url: &str, provider_url: &str) -> Settings {
    Settings {
        database_url: database_url.to_string(),
        database_key: "service-key".to_string(),
        alpha_vantage_api_key: "demo".to_string(),
        alpha_vantage_base_url: provider_url.to_string(),
        http_timeout_secs: 5,
        symbols: vec!["SPY".to_string()],
        options_table: "options_chain".to_string(),
        ingest_concurrency: 1,
        dashboard_host: "127.0.0.1".to_string(),
        dashboard_port: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(&|k: &str| map.get(k).cloned())
    }

    fn load_valid(pairs: &[(&str, &str)]) -> Result<Settings> {
        let s = load(pairs)?;
        s.validate()?;
        Ok(s)
    }

    const SECRETS: &[(&str, &str)] = &[
        ("SUPABASE_URL", "https://abc.supabase.co/"),
        ("SUPABASE_SERVICE_ROLE_KEY", "srv"),
        ("ALPHA_VANTAGE_API_KEY", "av"),
    ];

    #[test]
    fn missing_any_secret_is_fatal() {
        for skip in 0..SECRETS.len() {
            let pairs: Vec<_> = SECRETS
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, p)| *p)
                .collect();
            let err = load(&pairs).unwrap_err().to_string();
            assert!(err.contains("Missing"), "{err}");
        }

        let mut blank = SECRETS.to_vec();
        blank[2] = ("ALPHA_VANTAGE_API_KEY", "   ");
        assert!(load(&blank).is_err());
    }

    #[test]
    fn defaults_cover_the_tracked_universe() {
        let s = load(SECRETS).unwrap();
        assert_eq!(s.symbols.len(), 30);
        assert_eq!(s.symbols[0], "SPY");
        assert_eq!(s.symbols.last().map(String::as_str), Some("LULU"));
        assert_eq!(s.options_table, "options_chain");
        assert_eq!(s.ingest_concurrency, 1);
        assert_eq!(s.alpha_vantage_base_url, "https://www.alphavantage.co/query");
        assert_eq!(s.store_target(), StoreTarget::Rest("https://abc.supabase.co".to_string()));
    }

    #[test]
    fn aliases_and_sqlite_targets() {
        let s = load(&[
            ("DATABASE_URL", "sqlite:./data/chain.sqlite"),
            ("DATABASE_SERVICE_KEY", "local"),
            ("ALPHA_VANTAGE_API_KEY", "av"),
            ("TRACKED_SYMBOLS", "spy, qqq,,SPY"),
        ])
        .unwrap();
        assert_eq!(s.store_target(), StoreTarget::Sqlite("./data/chain.sqlite".to_string()));
        assert_eq!(s.symbols, vec!["SPY".to_string(), "QQQ".to_string()]);
    }

    #[test]
    fn rejects_bad_knobs() {
        let mut pairs = SECRETS.to_vec();
        pairs.push(("INGEST_CONCURRENCY", "0"));
        assert!(load_valid(&pairs).is_err());

        let mut pairs = SECRETS.to_vec();
        pairs.push(("OPTIONS_TABLE", "options; drop table x"));
        assert!(load_valid(&pairs).is_err());

        let mut pairs = SECRETS.to_vec();
        pairs.push(("HTTP_TIMEOUT_SECS", "soon"));
        assert!(load(&pairs).is_err());

        let mut pairs = SECRETS.to_vec();
        pairs.push(("DASHBOARD_PORT", "70000"));
        let err = load(&pairs).unwrap_err().to_string();
        assert!(err.contains("DASHBOARD_PORT"), "{err}");

        for url in ["sqlite::memory:", ":memory:", "sqlite:file::memory:?cache=shared"] {
            let mut pairs = SECRETS.to_vec();
            pairs[0] = ("SUPABASE_URL", url);
            let err = load_valid(&pairs).unwrap_err().to_string();
            assert!(err.contains("in-memory"), "{url}: {err}");
        }
    }

    #[test]
    fn symbols_flag_rescues_an_empty_env_list() {
        let mut pairs = SECRETS.to_vec();
        pairs.push(("TRACKED_SYMBOLS", ","));
        let mut s = load(&pairs).unwrap();
        assert!(s.validate().is_err());

        s.override_symbols("spy").unwrap();
        s.validate().unwrap();
        assert_eq!(s.symbols, vec!["SPY".to_string()]);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let s = load(SECRETS).unwrap();
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("srv"));
        assert!(dbg.contains("<redacted>"));
    }
}
