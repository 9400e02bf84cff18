// dbgwire type definitions
//
// Payload types carried by inbound messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

// Location in the debugged program (e.g. an instruction offset).
// The remote side is the authority on validity.
pub type Address = u64;

/// The program stopped because it reached a breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitBreakpoint {
    pub location: Address,
}

/// The program stopped for another reason, e.g. a completed single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breaking {
    pub location: Address,
}

/// Answer to a `ListBreakpoints` request.
///
/// The body shape belongs to the remote side, so it is kept as opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakpointList(pub Value);

impl BreakpointList {
    /// Locations from a `{"locations": [..]}` body, if it has that shape
    pub fn locations(&self) -> Option<Vec<Address>> {
        self.0
            .get("locations")?
            .as_array()?
            .iter()
            .map(Value::as_u64)
            .collect()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}
