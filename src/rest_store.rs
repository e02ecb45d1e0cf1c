use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;

use crate::{chain::OptionContract, store::ChainStore};

/// `options_chain` on a PostgREST-compatible hosted database, addressed as
/// `<base>/rest/v1/<table>` with the service credential on every request.
#[derive(Clone)]
pub struct RestStore {
    http: Client,
    base_url: String,
    api_key: String,
    table: String,
}

#[derive(Deserialize)]
struct ExpirationRow {
    expiration_date: Option<String>,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str, table: &str, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("build rest store http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            table: table.to_string(),
        })
    }

    fn request(&self, method: Method) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, self.table);
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
    }

    async fn check(resp: Response, what: &str) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(anyhow!("{what} failed status={status} body={body}"))
    }
}

#[async_trait]
impl ChainStore for RestStore {
    async fn upsert_contracts(&self, rows: &[OptionContract]) -> Result<()> {
        let resp = self
            .request(Method::POST)
            .query(&[("on_conflict", "contract_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()
            .await
            .with_context(|| format!("POST {}", self.table))?;
        Self::check(resp, "upsert").await?;
        Ok(())
    }

    async fn fetch_chain(&self, symbol: &str, expiration: &str) -> Result<Vec<OptionContract>> {
        let resp = self
            .request(Method::GET)
            .query(&[
                ("select", "*".to_string()),
                ("symbol", format!("eq.{symbol}")),
                ("expiration_date", format!("eq.{expiration}")),
                ("order", "strike.asc".to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("GET {} chain", self.table))?;
        let rows = Self::check(resp, "fetch_chain")
            .await?
            .json::<Vec<OptionContract>>()
            .await
            .context("decode chain rows")?;
        Ok(rows)
    }

    async fn fetch_expirations(&self, symbol: &str) -> Result<Vec<String>> {
        let resp = self
            .request(Method::GET)
            .query(&[
                ("select", "expiration_date".to_string()),
                ("symbol", format!("eq.{symbol}")),
                ("expiration_date", "not.is.null".to_string()),
                ("order", "expiration_date.asc".to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("GET {} expirations", self.table))?;
        let rows = Self::check(resp, "fetch_expirations")
            .await?
            .json::<Vec<ExpirationRow>>()
            .await
            .context("decode expiration rows")?;

        // PostgREST has no DISTINCT; rows arrive sorted so adjacent dedup is enough.
        let mut out: Vec<String> = rows
            .into_iter()
            .filter_map(|r| r.expiration_date)
            .filter(|s| !s.is_empty())
            .collect();
        out.dedup();
        Ok(out)
    }

    fn describe(&self) -> String {
        format!("rest:{}#{}", self.base_url, self.table)
    }
}
