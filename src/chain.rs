use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::utils::{first_text, is_truthy, nullable_number, to_number};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::Call => "call",
            OptionType::Put => "put",
        }
    }

    /// Only an exact (case-insensitive) "put" is a put. Anything else,
    /// including a missing type, is classified as a call.
    pub fn classify(raw: Option<&JsonValue>) -> Self {
        match raw.and_then(|v| v.as_str()) {
            Some(s) if s.to_lowercase() == "put" => OptionType::Put,
            _ => OptionType::Call,
        }
    }
}

impl std::str::FromStr for OptionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call" => Ok(OptionType::Call),
            "put" => Ok(OptionType::Put),
            other => Err(anyhow::anyhow!("unknown option_type {other}")),
        }
    }
}

/// One row of the `options_chain` table: the latest observed snapshot of a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub contract_id: String,
    pub symbol: String,
    pub option_type: OptionType,
    pub strike: f64,
    pub expiration_date: Option<String>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub mark: Option<f64>,
    pub volume: Option<f64>,
    pub open_interest: Option<f64>,
    pub implied_vol: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub rho: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// A provider contract record as received. Every field is kept as raw JSON
/// because the provider mixes numbers, numeric strings and empty strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawContract {
    pub contract: Option<JsonValue>,
    pub contract_id: Option<JsonValue>,
    #[serde(rename = "type")]
    pub kind: Option<JsonValue>,
    pub strike: Option<JsonValue>,
    pub expiration: Option<JsonValue>,
    pub expiration_date: Option<JsonValue>,
    pub bid: Option<JsonValue>,
    pub ask: Option<JsonValue>,
    pub last: Option<JsonValue>,
    pub mark: Option<JsonValue>,
    pub volume: Option<JsonValue>,
    pub open_interest: Option<JsonValue>,
    pub implied_volatility: Option<JsonValue>,
    pub delta: Option<JsonValue>,
    pub gamma: Option<JsonValue>,
    pub theta: Option<JsonValue>,
    pub vega: Option<JsonValue>,
    pub rho: Option<JsonValue>,
}

impl RawContract {
    /// Non-object elements decode to an empty record, which later fails the
    /// identifier check and is dropped.
    pub fn from_json(v: JsonValue) -> Self {
        serde_json::from_value(v).unwrap_or_default()
    }
}

/// Where the chain array was (or was not) found in a provider body.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainPayload {
    Contracts(Vec<JsonValue>),
    /// Neither `data` nor `options` carried anything.
    Missing,
    /// The chain key held something other than an array, usually an error or
    /// throttling notice. Kept so the caller can log it.
    Unrecognized(JsonValue),
}

impl ChainPayload {
    pub fn from_json(mut body: JsonValue) -> Self {
        let chain = ["data", "options"].iter().find_map(|key| {
            let obj = body.as_object_mut()?;
            if obj.get(*key).map(is_truthy).unwrap_or(false) {
                obj.remove(*key)
            } else {
                None
            }
        });
        match chain {
            Some(JsonValue::Array(items)) => ChainPayload::Contracts(items),
            Some(other) => ChainPayload::Unrecognized(other),
            None if provider_message(&body).is_some() => ChainPayload::Unrecognized(body),
            None => ChainPayload::Missing,
        }
    }
}

/// The provider reports throttling and bad symbols as a one-key object.
pub fn provider_message(v: &JsonValue) -> Option<&str> {
    ["Information", "Note", "Error Message"]
        .iter()
        .find_map(|k| v.get(*k).and_then(|m| m.as_str()))
}

/// Map one raw provider record onto the canonical row. `None` means the record
/// carried no contract identifier and must not be persisted.
pub fn normalize(symbol: &str, raw: &RawContract, now: DateTime<Utc>) -> Option<OptionContract> {
    let contract_id = first_text(&[raw.contract.as_ref(), raw.contract_id.as_ref()])?;

    // Strike is a required axis: falsy or unparseable collapses to 0, not null.
    let strike = raw
        .strike
        .as_ref()
        .filter(|v| is_truthy(v))
        .and_then(to_number)
        .unwrap_or(0.0);

    Some(OptionContract {
        contract_id,
        symbol: symbol.to_string(),
        option_type: OptionType::classify(raw.kind.as_ref()),
        strike,
        expiration_date: first_text(&[raw.expiration.as_ref(), raw.expiration_date.as_ref()]),
        bid: nullable_number(raw.bid.as_ref()),
        ask: nullable_number(raw.ask.as_ref()),
        last: nullable_number(raw.last.as_ref()),
        mark: nullable_number(raw.mark.as_ref()),
        volume: nullable_number(raw.volume.as_ref()),
        open_interest: nullable_number(raw.open_interest.as_ref()),
        implied_vol: nullable_number(raw.implied_volatility.as_ref()),
        delta: nullable_number(raw.delta.as_ref()),
        gamma: nullable_number(raw.gamma.as_ref()),
        theta: nullable_number(raw.theta.as_ref()),
        vega: nullable_number(raw.vega.as_ref()),
        rho: nullable_number(raw.rho.as_ref()),
        updated_at: now,
    })
}

pub fn normalize_all(symbol: &str, items: Vec<JsonValue>, now: DateTime<Utc>) -> Vec<OptionContract> {
    items
        .into_iter()
        .map(RawContract::from_json)
        .filter_map(|raw| normalize(symbol, &raw, now))
        .collect()
}
