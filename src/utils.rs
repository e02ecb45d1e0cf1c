 use chrono::{DateTime, SecondsFormat, Utc};
 use serde_json::Value as JsonValue;

 pub fn now_utc() -> DateTime<Utc> {
     Utc::now()
 }

 pub fn ts_text(ts: &DateTime<Utc>) -> String {
     ts.to_rfc3339_opts(SecondsFormat::Millis, true)
 }

 /// Provider payloads are loosely typed; a field only counts as present when it
 /// is "truthy": non-zero number, non-empty string, `true`, or any array/object.
 pub fn is_truthy(v: &JsonValue) -> bool {
     match v {
         JsonValue::Null => false,
         JsonValue::Bool(b) => *b,
         JsonValue::Number(n) => n.as_f64().map(|x| x != 0.0 && !x.is_nan()).unwrap_or(false),
         JsonValue::String(s) => !s.is_empty(),
         JsonValue::Array(_) | JsonValue::Object(_) => true,
     }
 }

 /// Numeric coercion for provider values. Strings are trimmed decimal text;
 /// anything that does not yield a finite number is `None`.
 pub fn to_number(v: &JsonValue) -> Option<f64> {
     let x = match v {
         JsonValue::Null => 0.0,
         JsonValue::Bool(b) => {
             if *b {
                 1.0
             } else {
                 0.0
             }
         }
         JsonValue::Number(n) => n.as_f64()?,
         JsonValue::String(s) => {
             let t = s.trim();
             if t.is_empty() {
                 0.0
             } else {
                 t.parse::<f64>().ok()?
             }
         }
         JsonValue::Array(_) | JsonValue::Object(_) => return None,
     };
     x.is_finite().then_some(x)
 }

 /// Nullable numeric column: falsy -> None, otherwise the coerced number.
 pub fn nullable_number(v: Option<&JsonValue>) -> Option<f64> {
     v.filter(|x| is_truthy(x)).and_then(to_number)
 }

 /// First truthy text-like value among `candidates`.
 pub fn first_text(candidates: &[Option<&JsonValue>]) -> Option<String> {
     candidates.iter().flatten().find(|v| is_truthy(v)).and_then(|v| match v {
         JsonValue::String(s) => Some(s.clone()),
         JsonValue::Number(n) => Some(n.to_string()),
         _ => None,
     })
 }
