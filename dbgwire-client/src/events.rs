// dbgwire event handling
//
// Inbound frames are decoded, classified by their single key and fanned out
// to subscribers over broadcast channels.

use crate::protocol::{DebugWireError, WireResult};
use crate::types::{BreakpointList, Breaking, HitBreakpoint};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

// Inbound tags, in dispatch order
pub const HIT_BREAKPOINT_TAG: &str = "HitBreakpoint";
pub const BREAKPOINTS_TAG: &str = "Breakpoints";
pub const BREAKING_TAG: &str = "Breaking";

pub const RECOGNIZED_TAGS: [&str; 3] = [HIT_BREAKPOINT_TAG, BREAKPOINTS_TAG, BREAKING_TAG];

// broadcast::channel panics on absurd capacities
pub const MAX_EVENT_CAPACITY: usize = 64 * 1024;

/// One classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    HitBreakpoint(HitBreakpoint),
    Breakpoints(BreakpointList),
    Breaking(Breaking),
    /// None of the recognized tags were present. Never delivered.
    Unrecognized { tags: Vec<String> },
}

/// Event published to local subscribers (not wire-visible)
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Error(Arc<std::io::Error>),
    HitBreakpoint(HitBreakpoint),
    Breakpoints(BreakpointList),
    Breaking(Breaking),
    Closed,
}

impl ConnectionEvent {
    /// Published event name
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Error(_) => "error",
            ConnectionEvent::HitBreakpoint(_) => "message-hitbreakpoint",
            ConnectionEvent::Breakpoints(_) => "message-breakpoints",
            ConnectionEvent::Breaking(_) => "message-breaking",
            ConnectionEvent::Closed => "close",
        }
    }

    /// Event payload as JSON
    pub fn payload(&self) -> Value {
        match self {
            ConnectionEvent::Error(e) => json!({
                "kind": format!("{:?}", e.kind()),
                "message": e.to_string(),
            }),
            ConnectionEvent::HitBreakpoint(hit) => json!(hit),
            ConnectionEvent::Breakpoints(list) => list.as_value().clone(),
            ConnectionEvent::Breaking(breaking) => json!(breaking),
            ConnectionEvent::Closed => Value::Null,
        }
    }
}

impl InboundMessage {
    /// Event to publish for this message; `None` for unrecognized tags
    pub fn into_event(self) -> Option<ConnectionEvent> {
        match self {
            InboundMessage::HitBreakpoint(hit) => Some(ConnectionEvent::HitBreakpoint(hit)),
            InboundMessage::Breakpoints(list) => Some(ConnectionEvent::Breakpoints(list)),
            InboundMessage::Breaking(breaking) => Some(ConnectionEvent::Breaking(breaking)),
            InboundMessage::Unrecognized { .. } => None,
        }
    }
}

/// Parse one complete frame as JSON
pub fn decode_frame(frame: &[u8]) -> WireResult<Value> {
    Ok(serde_json::from_slice(frame)?)
}

/// Classify a decoded message by its key.
///
/// Each recognized tag present yields one message, in `RECOGNIZED_TAGS`
/// order. A message with none of them yields a single `Unrecognized`.
pub fn classify(message: Value) -> WireResult<Vec<InboundMessage>> {
    let mut object = match message {
        Value::Object(object) => object,
        other => {
            trace!("Ignoring non-object message: {}", other);
            return Ok(vec![InboundMessage::Unrecognized { tags: Vec::new() }]);
        }
    };

    let mut classified = Vec::new();

    for tag in RECOGNIZED_TAGS {
        let Some(payload) = object.remove(tag) else {
            continue;
        };

        let invalid = |source: serde_json::Error| DebugWireError::InvalidPayload { tag, source };

        classified.push(match tag {
            HIT_BREAKPOINT_TAG => {
                InboundMessage::HitBreakpoint(serde_json::from_value(payload).map_err(invalid)?)
            }
            BREAKING_TAG => {
                InboundMessage::Breaking(serde_json::from_value(payload).map_err(invalid)?)
            }
            _ => InboundMessage::Breakpoints(BreakpointList(payload)),
        });
    }

    if classified.is_empty() {
        let tags: Vec<String> = object.keys().cloned().collect();
        debug!("Ignoring unrecognized message tags {:?}", tags);
        classified.push(InboundMessage::Unrecognized { tags });
    }

    Ok(classified)
}

/// Typed broadcast channels, one per recognized tag plus errors, and an
/// ordered stream of every event.
///
/// Each channel keeps the receiver it was created with until the first
/// subscriber claims it, so that subscriber also sees everything published
/// before it subscribed (up to the channel capacity). Later subscribers only
/// see events published after they subscribe.
#[derive(Debug, Clone)]
pub struct EventHub {
    all: broadcast::Sender<ConnectionEvent>,
    errors: broadcast::Sender<Arc<std::io::Error>>,
    hit_breakpoints: broadcast::Sender<HitBreakpoint>,
    breakpoints: broadcast::Sender<BreakpointList>,
    breaking: broadcast::Sender<Breaking>,
    parked: Arc<Mutex<Parked>>,
}

#[derive(Debug)]
struct Parked {
    all: Option<broadcast::Receiver<ConnectionEvent>>,
    errors: Option<broadcast::Receiver<Arc<std::io::Error>>>,
    hit_breakpoints: Option<broadcast::Receiver<HitBreakpoint>>,
    breakpoints: Option<broadcast::Receiver<BreakpointList>>,
    breaking: Option<broadcast::Receiver<Breaking>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let clamped = capacity.clamp(1, MAX_EVENT_CAPACITY);
        if clamped != capacity {
            warn!("Event capacity {} out of range, using {}", capacity, clamped);
        }

        let (all, all_rx) = broadcast::channel(clamped);
        let (errors, errors_rx) = broadcast::channel(clamped);
        let (hit_breakpoints, hit_breakpoints_rx) = broadcast::channel(clamped);
        let (breakpoints, breakpoints_rx) = broadcast::channel(clamped);
        let (breaking, breaking_rx) = broadcast::channel(clamped);

        Self {
            all,
            errors,
            hit_breakpoints,
            breakpoints,
            breaking,
            parked: Arc::new(Mutex::new(Parked {
                all: Some(all_rx),
                errors: Some(errors_rx),
                hit_breakpoints: Some(hit_breakpoints_rx),
                breakpoints: Some(breakpoints_rx),
                breaking: Some(breaking_rx),
            })),
        }
    }

    fn parked(&self) -> MutexGuard<'_, Parked> {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand an event to subscribers without waiting for them.
    ///
    /// Sending with no receivers is not an error; the event is just dropped.
    /// That only happens once every subscriber, parked ones included, is gone.
    pub fn publish(&self, event: ConnectionEvent) {
        trace!("Publishing {}", event.name());

        match &event {
            ConnectionEvent::Error(e) => {
                let _ = self.errors.send(Arc::clone(e));
            }
            ConnectionEvent::HitBreakpoint(hit) => {
                let _ = self.hit_breakpoints.send(*hit);
            }
            ConnectionEvent::Breakpoints(list) => {
                let _ = self.breakpoints.send(list.clone());
            }
            ConnectionEvent::Breaking(breaking) => {
                let _ = self.breaking.send(*breaking);
            }
            ConnectionEvent::Closed => {}
        }

        let _ = self.all.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.parked()
            .all
            .take()
            .unwrap_or_else(|| self.all.subscribe())
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<Arc<std::io::Error>> {
        self.parked()
            .errors
            .take()
            .unwrap_or_else(|| self.errors.subscribe())
    }

    pub fn subscribe_hit_breakpoints(&self) -> broadcast::Receiver<HitBreakpoint> {
        self.parked()
            .hit_breakpoints
            .take()
            .unwrap_or_else(|| self.hit_breakpoints.subscribe())
    }

    pub fn subscribe_breakpoints(&self) -> broadcast::Receiver<BreakpointList> {
        self.parked()
            .breakpoints
            .take()
            .unwrap_or_else(|| self.breakpoints.subscribe())
    }

    pub fn subscribe_breaking(&self) -> broadcast::Receiver<Breaking> {
        self.parked()
            .breaking
            .take()
            .unwrap_or_else(|| self.breaking.subscribe())
    }
}
