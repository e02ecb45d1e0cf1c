use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value as JsonValue;

use crate::{
    chain::{normalize_all, provider_message, ChainPayload, OptionContract},
    config::Settings,
    utils::now_utc,
};

/// Alpha Vantage `REALTIME_OPTIONS` client. One GET per symbol, no retry.
#[derive(Clone)]
pub struct AlphaVantageClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantageClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()
            .context("build provider http client")?;
        Ok(Self {
            http,
            base_url: settings.alpha_vantage_base_url.clone(),
            api_key: settings.alpha_vantage_api_key.clone(),
        })
    }

    /// Fetch and classify the chain payload for `symbol`. The body is decoded
    /// regardless of HTTP status since throttling arrives as a normal JSON body.
    /// Errors carry no request URL; it holds the api key.
    pub async fn fetch_payload(&self, symbol: &str) -> Result<ChainPayload> {
        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("function", "REALTIME_OPTIONS"),
                ("symbol", symbol),
                ("require_greeks", "true"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("REALTIME_OPTIONS {symbol}"))?;
        let status = resp.status();
        let body = resp
            .json::<JsonValue>()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("decode REALTIME_OPTIONS {symbol} status={status}"))?;
        Ok(ChainPayload::from_json(body))
    }

    /// Normalized chain for `symbol`, stamped when the body arrives. Transport
    /// errors, undecodable bodies and unrecognized payloads all come back empty.
    pub async fn fetch_chain(&self, symbol: &str) -> Vec<OptionContract> {
        match self.fetch_payload(symbol).await {
            Ok(ChainPayload::Contracts(items)) => {
                let n_raw = items.len();
                let rows = normalize_all(symbol, items, now_utc());
                if rows.len() < n_raw {
                    log::debug!(
                        "provider.dropped_rows symbol={} dropped={} kept={}",
                        symbol,
                        n_raw - rows.len(),
                        rows.len()
                    );
                }
                rows
            }
            Ok(ChainPayload::Missing) => {
                log::debug!("provider.no_chain symbol={}", symbol);
                Vec::new()
            }
            Ok(ChainPayload::Unrecognized(payload)) => {
                log::warn!(
                    "provider.unrecognized_payload symbol={} detail={}",
                    symbol,
                    describe_payload(&payload)
                );
                Vec::new()
            }
            Err(e) => {
                log::warn!("provider.fetch_failed symbol={} err={:#}", symbol, e);
                Vec::new()
            }
        }
    }
}

fn describe_payload(payload: &JsonValue) -> String {
    if let Some(msg) = provider_message(payload) {
        return msg.to_string();
    }
    let mut s = payload.to_string();
    if s.len() > 240 {
        let cut = (0..=240).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0);
        s.truncate(cut);
        s.push('…');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::OptionType;
    use crate::config::test_settings;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(mock_server: &MockServer) -> AlphaVantageClient {
        let settings = test_settings("sqlite:unused.sqlite", &format!("{}/query", mock_server.uri()));
        AlphaVantageClient::new(&settings).unwrap()
    }

    #[tokio::test]
    async fn sends_realtime_options_query_and_normalizes() {
        let mock_server = MockServer::start().await;

        let response_body = r#"{
            "endpoint": "Realtime Options",
            "message": "success",
            "data": [
                {"contract": "SPY240621C00450000", "type": "Call", "strike": "450",
                 "expiration": "2024-06-21", "bid": "2.10", "ask": "2.15", "volume": 0},
                {"type": "put", "strike": "440"}
            ]
        }"#;

        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("function", "REALTIME_OPTIONS"))
            .and(query_param("symbol", "SPY"))
            .and(query_param("require_greeks", "true"))
            .and(query_param("apikey", "demo"))
            .respond_with(ResponseTemplate::new(200).set_body_string(response_body))
            .expect(1)
            .mount(&mock_server)
            .await;

        let before = now_utc();
        let rows = client(&mock_server).fetch_chain("SPY").await;
        let after = now_utc();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].contract_id, "SPY240621C00450000");
        assert_eq!(rows[0].option_type, OptionType::Call);
        assert_eq!(rows[0].strike, 450.0);
        assert_eq!(rows[0].volume, None);
        assert!(rows[0].updated_at >= before && rows[0].updated_at <= after);
    }

    #[tokio::test]
    async fn options_key_is_accepted() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"options": [{"contract_id": "QQQ1", "type": "PUT"}]}"#),
            )
            .mount(&mock_server)
            .await;

        let rows = client(&mock_server).fetch_chain("QQQ").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].option_type, OptionType::Put);
        assert_eq!(rows[0].symbol, "QQQ");
    }

    #[tokio::test]
    async fn object_shaped_chain_yields_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"data": {"error": "invalid symbol"}}"#),
            )
            .mount(&mock_server)
            .await;

        let c = client(&mock_server);
        assert!(matches!(
            c.fetch_payload("ZZZZ").await.unwrap(),
            ChainPayload::Unrecognized(_)
        ));
        assert!(c.fetch_chain("ZZZZ").await.is_empty());
    }

    #[tokio::test]
    async fn throttling_notice_and_bad_bodies_yield_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("symbol", "SPY"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"Information": "Thank you for using Alpha Vantage! Please consider spreading out your free API requests more sparingly (1 request per second)."}"#,
            ))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("symbol", "DIA"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&mock_server)
            .await;

        let c = client(&mock_server);
        assert!(c.fetch_chain("SPY").await.is_empty());
        assert!(c.fetch_payload("DIA").await.is_err());
        assert!(c.fetch_chain("DIA").await.is_empty());
    }

    #[tokio::test]
    async fn transport_errors_do_not_leak_the_api_key() {
        let mut settings = test_settings("sqlite:unused.sqlite", "http://127.0.0.1:9/query");
        settings.alpha_vantage_api_key = "SECRETKEY123".to_string();
        let c = AlphaVantageClient::new(&settings).unwrap();

        let err = format!("{:#}", c.fetch_payload("SPY").await.unwrap_err());
        assert!(err.contains("REALTIME_OPTIONS SPY"), "{err}");
        assert!(!err.contains("SECRETKEY123"), "{err}");
    }

    #[tokio::test]
    async fn decode_errors_do_not_leak_the_api_key() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let mut settings = test_settings("sqlite:unused.sqlite", &format!("{}/query", mock_server.uri()));
        settings.alpha_vantage_api_key = "SECRETKEY123".to_string();
        let c = AlphaVantageClient::new(&settings).unwrap();

        let err = format!("{:#}", c.fetch_payload("SPY").await.unwrap_err());
        assert!(err.contains("decode REALTIME_OPTIONS SPY"), "{err}");
        assert!(!err.contains("SECRETKEY123"), "{err}");
    }

    #[test]
    fn payload_description_prefers_provider_message() {
        let p = serde_json::json!({"Note": "call frequency exceeded"});
        assert_eq!(describe_payload(&p), "call frequency exceeded");

        let long = serde_json::json!({"error": "x".repeat(1000)});
        let d = describe_payload(&long);
        assert!(d.chars().count() <= 241);
        assert!(d.ends_with('…'));
    }
}
