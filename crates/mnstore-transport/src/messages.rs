//! Request and response messages.
//!
//! A request is the CBOR array `[name, body]`; a response is
//! `[name, status, body]` where status is `"SUCCESS"` or `"ERROR"` and an
//! error body is a message string.

use ciborium::Value;
use mnstore_types::ChunkId;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{cbor, Result, TransportError};

pub const FETCHCHUNK_REQ: &str = "FETCHCHUNK_REQ";
pub const FETCHCHUNK_RESP: &str = "FETCHCHUNK_RESP";
pub const SPOTCHECK_REQ: &str = "SPOTCHECK_REQ";
pub const SPOTCHECK_RESP: &str = "SPOTCHECK_RESP";
pub const PING_REQ: &str = "PING_REQ";
pub const PING_RESP: &str = "PING_RESP";

/// Prefix of every error message returned to a caller.
pub const RPC_ERROR_PREFIX: &str = "RPC ERROR happened: ";

/// Response name for a request name, e.g. `PING_REQ` to `PING_RESP`.
pub fn response_name(request_name: &str) -> String {
    match request_name.strip_suffix("_REQ") {
        Some(stem) => format!("{stem}_RESP"),
        None => format!("{request_name}_RESP"),
    }
}

/// `[name, body]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawRequest(pub String, pub Value);

/// `[name, status, body]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawResponse(pub String, pub Status, pub Value);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "ERROR")]
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchChunkRequest {
    pub chunkid: String,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchChunkResponse {
    #[serde_as(as = "Option<serde_with::Bytes>")]
    pub chunk: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotCheckRequest {
    pub chunkid: String,
    pub start: u64,
    pub end: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotCheckResponse {
    pub digest: String,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingBody {
    #[serde_as(as = "serde_with::Bytes")]
    pub data: Vec<u8>,
}

/// A decoded request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    FetchChunk(FetchChunkRequest),
    SpotCheck(SpotCheckRequest),
    Ping(PingBody),
}

/// A decoded successful response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    FetchChunk(FetchChunkResponse),
    SpotCheck(SpotCheckResponse),
    Ping(PingBody),
}

impl Request {
    pub fn fetch_chunk(id: &ChunkId) -> Self {
        Self::FetchChunk(FetchChunkRequest {
            chunkid: id.to_hex(),
        })
    }

    pub fn spot_check(id: &ChunkId, start: u64, end: u64) -> Self {
        Self::SpotCheck(SpotCheckRequest {
            chunkid: id.to_hex(),
            start,
            end,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchChunk(_) => FETCHCHUNK_REQ,
            Self::SpotCheck(_) => SPOTCHECK_REQ,
            Self::Ping(_) => PING_REQ,
        }
    }

    pub fn to_raw(&self) -> Result<RawRequest> {
        let body = match self {
            Self::FetchChunk(b) => cbor::to_value(b)?,
            Self::SpotCheck(b) => cbor::to_value(b)?,
            Self::Ping(b) => cbor::to_value(b)?,
        };
        Ok(RawRequest(self.name().to_string(), body))
    }

    /// Interpret a raw request. Unknown names and malformed bodies are
    /// protocol violations.
    pub fn from_raw(raw: &RawRequest) -> Result<Self> {
        match raw.0.as_str() {
            FETCHCHUNK_REQ => Ok(Self::FetchChunk(cbor::from_value(&raw.1)?)),
            SPOTCHECK_REQ => Ok(Self::SpotCheck(cbor::from_value(&raw.1)?)),
            PING_REQ => Ok(Self::Ping(cbor::from_value(&raw.1)?)),
            other => Err(TransportError::ProtocolViolation(format!(
                "unknown request name {other}"
            ))),
        }
    }
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchChunk(_) => FETCHCHUNK_RESP,
            Self::SpotCheck(_) => SPOTCHECK_RESP,
            Self::Ping(_) => PING_RESP,
        }
    }

    pub fn to_raw(&self) -> Result<RawResponse> {
        let body = match self {
            Self::FetchChunk(b) => cbor::to_value(b)?,
            Self::SpotCheck(b) => cbor::to_value(b)?,
            Self::Ping(b) => cbor::to_value(b)?,
        };
        Ok(RawResponse(self.name().to_string(), Status::Success, body))
    }

    /// Error response for `request_name`.
    pub fn error(request_name: &str, message: &str) -> RawResponse {
        RawResponse(
            response_name(request_name),
            Status::Error,
            Value::Text(format!("{RPC_ERROR_PREFIX}{message}")),
        )
    }

    /// Interpret a raw response to a request named `request_name`.
    pub fn from_raw(request_name: &str, raw: &RawResponse) -> Result<Self> {
        let expected = response_name(request_name);
        if raw.0 != expected {
            return Err(TransportError::ProtocolViolation(format!(
                "expected {expected}, got {}",
                raw.0
            )));
        }
        if raw.1 == Status::Error {
            let message = match &raw.2 {
                Value::Text(s) => s.clone(),
                other => format!("{other:?}"),
            };
            return Err(TransportError::RemoteError(message));
        }
        match raw.0.as_str() {
            FETCHCHUNK_RESP => Ok(Self::FetchChunk(cbor::from_value(&raw.2)?)),
            SPOTCHECK_RESP => Ok(Self::SpotCheck(cbor::from_value(&raw.2)?)),
            PING_RESP => Ok(Self::Ping(cbor::from_value(&raw.2)?)),
            other => Err(TransportError::ProtocolViolation(format!(
                "unknown response name {other}"
            ))),
        }
    }
}
