//! JSON envelope encoding for the Wiz UDP protocol.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// Protocol methods the driver speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
pub enum Method {
    /// Query the current state.
    #[strum(serialize = "getPilot")]
    GetPilot,
    /// Apply a full state snapshot.
    #[strum(serialize = "setPilot")]
    SetPilot,
    /// Query module and firmware details.
    #[strum(serialize = "getSystemConfig")]
    GetSystemConfig,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize)]
struct Request<'a, P: Serialize> {
    method: &'a str,
    params: &'a P,
    id: Option<&'a str>,
}

/// Reply envelope. Only `result` is required; an explicit `null` counts as present.
#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default, with = "::serde_with::rust::double_option")]
    result: Option<Option<Value>>,
}

/// The empty parameter object sent with queries.
pub fn no_params() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Encode `{"method": <method>, "params": <params>}`.
///
/// # Examples
///
/// ```
/// use wiz_sync::codec::{self, Method};
///
/// let bytes = codec::encode(Method::GetPilot, &codec::no_params()).unwrap();
/// assert_eq!(bytes, br#"{"method":"getPilot","params":{}}"#);
/// ```
pub fn encode<P: Serialize>(method: Method, params: &P) -> Result<Vec<u8>> {
    encode_request(method, params, None)
}

/// Encode a request that also carries a correlation `id`.
pub fn encode_with_id<P: Serialize>(method: Method, params: &P, id: &str) -> Result<Vec<u8>> {
    encode_request(method, params, Some(id))
}

fn encode_request<P: Serialize>(method: Method, params: &P, id: Option<&str>) -> Result<Vec<u8>> {
    let request = Request {
        method: method.as_ref(),
        params,
        id,
    };
    serde_json::to_vec(&request).map_err(Error::JsonDump)
}

/// Decode a datagram and return its `result` member.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(bytes).map_err(Error::malformed)?;
    let reply: Reply = serde_json::from_str(text).map_err(Error::malformed)?;
    match reply.result {
        Some(result) => Ok(result.unwrap_or(Value::Null)),
        None => Err(Error::malformed("missing `result` member")),
    }
}

/// Decode a datagram and deserialize its `result` member into `T`.
pub fn decode_as<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    decode(bytes).and_then(|result| serde_json::from_value(result).map_err(Error::malformed))
}

/// True when `bytes` is a request envelope (it has `params` but no `result`)
/// that carries correlation id `id`.
pub(crate) fn is_request_echo(bytes: &[u8], id: &str) -> bool {
    let Ok(value) = serde_json::from_slice::<Value>(bytes) else {
        return false;
    };
    value.get("result").is_none()
        && value.get("params").is_some()
        && value.get("id").and_then(Value::as_str) == Some(id)
}
