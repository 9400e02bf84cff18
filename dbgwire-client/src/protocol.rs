// dbgwire protocol definitions and request encoding
//
// Every message on the wire is a single-key JSON object `{"<Tag>": <payload>}`
// terminated by one NUL byte. There is no length prefix and no checksum.

use crate::types::Address;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type WireResult<T> = Result<T, DebugWireError>;

#[derive(Debug, Error)]
pub enum DebugWireError {
    #[error("failed to connect to debugger at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid {tag} payload: {source}")]
    InvalidPayload {
        tag: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("frame exceeds {max} bytes and was discarded")]
    FrameTooLarge { max: usize },

    #[error("configuration error: {0}")]
    Config(String),
}

// Well-known debugger port on localhost
pub const DEBUGGER_PORT: u16 = 57017;
pub const DEFAULT_HOST: &str = "127.0.0.1";

// Single-byte frame delimiter
pub const DELIMITER: u8 = 0x00;

/// Upper bound on a single frame (10MB).
/// A remote side that never sends a delimiter would otherwise grow the
/// accumulation buffer without limit.
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Outbound request, serialized externally tagged: `{"SetBreakpoints":{"locations":[..]}}`.
///
/// Nullary variants are struct variants with no fields so that they encode
/// with an empty object body (`{"Continue":{}}`) rather than a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    StartExecution {},
    Continue {},
    StepOne {},
    SetBreakpoints { locations: Vec<Address> },
    RemoveBreakpoints { locations: Vec<Address> },
    ListBreakpoints {},
}

impl Request {
    pub fn start_execution() -> Self {
        Request::StartExecution {}
    }

    pub fn continue_execution() -> Self {
        Request::Continue {}
    }

    pub fn step_one() -> Self {
        Request::StepOne {}
    }

    pub fn set_breakpoints(locations: impl Into<Vec<Address>>) -> Self {
        Request::SetBreakpoints {
            locations: locations.into(),
        }
    }

    pub fn remove_breakpoints(locations: impl Into<Vec<Address>>) -> Self {
        Request::RemoveBreakpoints {
            locations: locations.into(),
        }
    }

    pub fn list_breakpoints() -> Self {
        Request::ListBreakpoints {}
    }

    /// Wire tag of this request
    pub fn tag(&self) -> &'static str {
        match self {
            Request::StartExecution {} => "StartExecution",
            Request::Continue {} => "Continue",
            Request::StepOne {} => "StepOne",
            Request::SetBreakpoints { .. } => "SetBreakpoints",
            Request::RemoveBreakpoints { .. } => "RemoveBreakpoints",
            Request::ListBreakpoints {} => "ListBreakpoints",
        }
    }

    /// Encode as JSON followed by the delimiter byte
    pub fn encode(&self) -> WireResult<Bytes> {
        let json = serde_json::to_vec(self)?;
        let mut buf = BytesMut::with_capacity(json.len() + 1);

        buf.put_slice(&json);
        buf.put_u8(DELIMITER);

        Ok(buf.freeze())
    }
}
