//! Wire schema exchanged with provider scripts.
//!
//! The host serializes a [`ResolutionRequest`] to JSON, passes it to the
//! script's entry point as a single string, and parses the returned string
//! as a [`ResolutionResponse`]. Field names are part of the script contract.
//!
//! ```text
//! host → script  {"times":1,"provider":4,...,"html_data":"","call_back_data":{}}
//! script → host  {"done":false,"fetch_url_new":{"url":"...","method":"GET",...},"call_back_data":{...}}
//! host → script  {"times":2,...,"html_data":"<fetched body>","call_back_data":{...}}
//! script → host  {"done":true,"urls":["https://cdn.example/a.m3u8"]}
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ResolveError, Result};
use crate::provider::PlaySource;

/// Opaque state the script hands back to itself through the host.
///
/// The host never looks inside; whatever the script returned on iteration
/// `n` is sent back unchanged on iteration `n + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackData(pub Value);

impl Default for CallbackData {
    fn default() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }
}

/// Host → script message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    /// 1-based iteration counter.
    pub times: u32,
    pub provider: u32,
    pub quality: u8,
    pub tv_type: String,
    pub content_type: u32,
    pub channel: String,
    /// Body of the previous fetch, empty on the first iteration.
    pub html_data: String,
    pub url: String,
    pub call_back_data: CallbackData,
}

impl ResolutionRequest {
    /// First request of a run.
    pub fn initial(source: &PlaySource) -> Self {
        Self {
            times: 1,
            provider: source.provider.0,
            quality: source.quality.code(),
            tv_type: source.tv_type.clone(),
            content_type: source.content_type.code(),
            channel: source.channel.clone(),
            html_data: String::new(),
            url: source.url.clone(),
            call_back_data: CallbackData::default(),
        }
    }

    /// Request for the following iteration, carrying the fetched body and
    /// the script's state forward.
    #[must_use]
    pub fn next(&self, html_data: String, call_back_data: CallbackData) -> Self {
        Self {
            times: self.times + 1,
            html_data,
            call_back_data,
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Headers a script may ask for on a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchHeaders {
    #[serde(default, deserialize_with = "nullable")]
    pub user_agent: String,
    #[serde(default, deserialize_with = "nullable")]
    pub referer: String,
    #[serde(default, deserialize_with = "nullable")]
    pub content_type: String,
}

/// A fetch the script wants the host to perform before the next iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchInstruction {
    #[serde(default, deserialize_with = "nullable")]
    pub url: String,
    /// HTTP method, `GET` when empty.
    #[serde(default, deserialize_with = "nullable")]
    pub method: String,
    #[serde(default, deserialize_with = "nullable")]
    pub header: FetchHeaders,
    #[serde(default, deserialize_with = "nullable")]
    pub body: String,
}

impl FetchInstruction {
    /// Returns `true` when the instruction names something to fetch.
    pub fn is_usable(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// Script → host message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResponse {
    /// `false` asks for another iteration.
    #[serde(default, deserialize_with = "nullable")]
    pub done: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub fetch_url_new: FetchInstruction,
    /// Final URLs. More than one means ordered segments of a single stream.
    #[serde(default, deserialize_with = "nullable")]
    pub urls: Vec<String>,
    /// Seek/rewind support, passed through untouched.
    #[serde(default, deserialize_with = "flag")]
    pub is_support_back: bool,
    /// Legacy plain fetch URL, passed through untouched.
    #[serde(default, deserialize_with = "nullable")]
    pub fetch_url: String,
    /// `None` when the field is absent: the previous state carries over.
    /// An explicit `null` is `Some` and replaces it.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub call_back_data: Option<CallbackData>,
}

impl ResolutionResponse {
    /// Parse the string returned by the script's entry point.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw.trim()).map_err(|e| {
            ResolveError::protocol(format!("response is not JSON ({e}): {}", preview(raw)))
        })?;
        if !value.is_object() {
            return Err(ResolveError::protocol(format!(
                "response must be a JSON object: {}",
                preview(raw)
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| ResolveError::protocol(format!("response does not match schema: {e}")))
    }
}

/// First 200 chars of a script response, for error messages.
fn preview(raw: &str) -> String {
    let mut out: String = raw.chars().take(200).collect();
    if out.len() < raw.len() {
        out.push_str("...");
    }
    out
}

/// `null` parses as the field's default.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Any present value, `null` included, is `Some`.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Accepts `true`/`false`, `0`/`1` or `null`.
fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(b),
        Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Some(other) => Err(D::Error::custom(format!(
            "expected bool or number, got {other}"
        ))),
    }
}
