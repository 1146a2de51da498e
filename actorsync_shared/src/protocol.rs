//! Wire protocol messages.
//!
//! Every server message is an array `[type, payload...]`. Actor records are
//! positional arrays to keep frames small:
//!
//! - INIT / CREATE / UPDATE: `[[id, x, y, mx, my, (class)], payload?]`
//! - REMOVE: `[id]`
//! - DESTROY: `[id, x, y]`
//! - EVENT: `id, kind, data?` (spread over the message itself)

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{codec, error::ProtocolError};

/// Positions and velocities are sent with this many decimals.
pub const WIRE_DECIMALS: i32 = 2;

/// Rounds a coordinate to wire precision.
pub fn round_wire(v: f64) -> f64 {
    let scale = 10f64.powi(WIRE_DECIMALS);
    (v * scale).round() / scale
}

/// Identifies an actor. Never reused within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub u64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Identifies a connected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Actor class name, the key into behavior tables on both ends.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub String);

impl ClassId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassId {
    fn from(s: &str) -> Self {
        ClassId(s.to_string())
    }
}

impl From<String> for ClassId {
    fn from(s: String) -> Self {
        ClassId(s)
    }
}

/// Numeric message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    GameStart = 1,
    GameFields = 2,
    GameShutdown = 3,
    ActorsInit = 4,
    ActorsCreate = 5,
    ActorsUpdate = 6,
    ActorsRemove = 7,
    ActorsDestroy = 8,
    ActorsEvent = 9,
}

impl MsgType {
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            1 => Self::GameStart,
            2 => Self::GameFields,
            3 => Self::GameShutdown,
            4 => Self::ActorsInit,
            5 => Self::ActorsCreate,
            6 => Self::ActorsUpdate,
            7 => Self::ActorsRemove,
            8 => Self::ActorsDestroy,
            9 => Self::ActorsEvent,
            _ => return None,
        })
    }

    pub fn code(self) -> u64 {
        self as u64
    }
}

/// Serialized actor state. `class` is only present in full records.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorFrame {
    pub id: ActorId,
    pub x: f64,
    pub y: f64,
    pub mx: f64,
    pub my: f64,
    pub class: Option<ClassId>,
    pub payload: Option<Value>,
}

impl ActorFrame {
    /// Builds a frame with coordinates rounded to wire precision.
    pub fn new(id: ActorId, pos: (f64, f64), vel: (f64, f64)) -> Self {
        Self {
            id,
            x: round_wire(pos.0),
            y: round_wire(pos.1),
            mx: round_wire(vel.0),
            my: round_wire(vel.1),
            class: None,
            payload: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.class.is_some()
    }

    fn to_value(&self) -> Value {
        let mut raw = vec![
            json!(self.id.0),
            json!(self.x),
            json!(self.y),
            json!(self.mx),
            json!(self.my),
        ];
        if let Some(class) = &self.class {
            raw.push(Value::String(class.0.clone()));
        }
        let mut rec = vec![Value::Array(raw)];
        if let Some(payload) = self.payload.as_ref().filter(|p| !p.is_null()) {
            rec.push(payload.clone());
        }
        Value::Array(rec)
    }

    fn from_value(v: &Value) -> Result<Self, ProtocolError> {
        let rec = v.as_array().ok_or(ProtocolError::Malformed("actor record"))?;
        let raw = rec
            .first()
            .and_then(Value::as_array)
            .ok_or(ProtocolError::Malformed("actor state"))?;
        if raw.len() < 5 {
            return Err(ProtocolError::Malformed("actor state"));
        }
        let num = |i: usize| raw[i].as_f64().ok_or(ProtocolError::Malformed("actor coordinate"));
        Ok(Self {
            id: ActorId(raw[0].as_u64().ok_or(ProtocolError::Malformed("actor id"))?),
            x: num(1)?,
            y: num(2)?,
            mx: num(3)?,
            my: num(4)?,
            class: match raw.get(5) {
                Some(Value::String(s)) => Some(ClassId(s.clone())),
                Some(_) => return Err(ProtocolError::Malformed("actor class")),
                None => None,
            },
            payload: rec.get(1).cloned(),
        })
    }
}

/// Final state of a destroyed actor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActorDestroyed {
    pub id: ActorId,
    pub x: f64,
    pub y: f64,
}

/// An application event addressed to one actor.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorEvent {
    pub id: ActorId,
    pub kind: String,
    pub data: Option<Value>,
}

/// Server → client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMsg {
    GameStart {
        session_id: SessionId,
        tick_interval_ms: u64,
        fields: Map<String, Value>,
    },
    GameFields(Map<String, Value>),
    GameShutdown,
    ActorsInit(Vec<ActorFrame>),
    ActorsCreate(Vec<ActorFrame>),
    ActorsUpdate(Vec<ActorFrame>),
    ActorsRemove(Vec<ActorId>),
    ActorsDestroy(Vec<ActorDestroyed>),
    ActorsEvent(ActorEvent),
}

impl ServerMsg {
    pub fn msg_type(&self) -> MsgType {
        match self {
            ServerMsg::GameStart { .. } => MsgType::GameStart,
            ServerMsg::GameFields(_) => MsgType::GameFields,
            ServerMsg::GameShutdown => MsgType::GameShutdown,
            ServerMsg::ActorsInit(_) => MsgType::ActorsInit,
            ServerMsg::ActorsCreate(_) => MsgType::ActorsCreate,
            ServerMsg::ActorsUpdate(_) => MsgType::ActorsUpdate,
            ServerMsg::ActorsRemove(_) => MsgType::ActorsRemove,
            ServerMsg::ActorsDestroy(_) => MsgType::ActorsDestroy,
            ServerMsg::ActorsEvent(_) => MsgType::ActorsEvent,
        }
    }

    /// Returns the message as its top-level array elements.
    pub fn to_elements(&self) -> Vec<Value> {
        let mut out = vec![json!(self.msg_type().code())];
        match self {
            ServerMsg::GameStart {
                session_id,
                tick_interval_ms,
                fields,
            } => {
                out.push(json!(session_id.0));
                out.push(json!(tick_interval_ms));
                out.push(Value::Object(fields.clone()));
            }
            ServerMsg::GameFields(fields) => out.push(Value::Object(fields.clone())),
            ServerMsg::GameShutdown => {}
            ServerMsg::ActorsInit(frames)
            | ServerMsg::ActorsCreate(frames)
            | ServerMsg::ActorsUpdate(frames) => {
                out.extend(frames.iter().map(ActorFrame::to_value));
            }
            ServerMsg::ActorsRemove(ids) => {
                out.extend(ids.iter().map(|id| json!([id.0])));
            }
            ServerMsg::ActorsDestroy(items) => {
                out.extend(items.iter().map(|d| json!([d.id.0, d.x, d.y])));
            }
            ServerMsg::ActorsEvent(ev) => {
                out.push(json!(ev.id.0));
                out.push(Value::String(ev.kind.clone()));
                if let Some(data) = &ev.data {
                    out.push(data.clone());
                }
            }
        }
        out
    }

    pub fn from_elements(elements: Vec<Value>) -> Result<Self, ProtocolError> {
        let mut it = elements.into_iter();
        let code = it
            .next()
            .ok_or(ProtocolError::Empty)?
            .as_u64()
            .ok_or(ProtocolError::Malformed("message type"))?;
        let ty = MsgType::from_code(code).ok_or(ProtocolError::UnknownType(code))?;
        let rest: Vec<Value> = it.collect();

        let fields_at = |i: usize| -> Result<Map<String, Value>, ProtocolError> {
            match rest.get(i) {
                Some(Value::Object(m)) => Ok(m.clone()),
                _ => Err(ProtocolError::Malformed("shared fields")),
            }
        };
        let frames = || rest.iter().map(ActorFrame::from_value).collect::<Result<Vec<_>, _>>();

        Ok(match ty {
            MsgType::GameStart => ServerMsg::GameStart {
                session_id: SessionId(
                    rest.first()
                        .and_then(Value::as_u64)
                        .ok_or(ProtocolError::Malformed("session id"))?,
                ),
                tick_interval_ms: rest
                    .get(1)
                    .and_then(Value::as_u64)
                    .ok_or(ProtocolError::Malformed("tick interval"))?,
                fields: fields_at(2)?,
            },
            MsgType::GameFields => ServerMsg::GameFields(fields_at(0)?),
            MsgType::GameShutdown => ServerMsg::GameShutdown,
            MsgType::ActorsInit => ServerMsg::ActorsInit(frames()?),
            MsgType::ActorsCreate => ServerMsg::ActorsCreate(frames()?),
            MsgType::ActorsUpdate => ServerMsg::ActorsUpdate(frames()?),
            MsgType::ActorsRemove => ServerMsg::ActorsRemove(
                rest.iter()
                    .map(|v| {
                        v.get(0)
                            .and_then(Value::as_u64)
                            .map(ActorId)
                            .ok_or(ProtocolError::Malformed("remove record"))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            MsgType::ActorsDestroy => ServerMsg::ActorsDestroy(
                rest.iter()
                    .map(|v| {
                        let bad = ProtocolError::Malformed("destroy record");
                        let id = v.get(0).and_then(Value::as_u64).ok_or(bad)?;
                        let x = v.get(1).and_then(Value::as_f64);
                        let y = v.get(2).and_then(Value::as_f64);
                        match (x, y) {
                            (Some(x), Some(y)) => Ok(ActorDestroyed {
                                id: ActorId(id),
                                x,
                                y,
                            }),
                            _ => Err(ProtocolError::Malformed("destroy record")),
                        }
                    })
                    .collect::<Result<_, _>>()?,
            ),
            MsgType::ActorsEvent => ServerMsg::ActorsEvent(ActorEvent {
                id: ActorId(
                    rest.first()
                        .and_then(Value::as_u64)
                        .ok_or(ProtocolError::Malformed("event actor id"))?,
                ),
                kind: rest
                    .get(1)
                    .and_then(Value::as_str)
                    .ok_or(ProtocolError::Malformed("event kind"))?
                    .to_string(),
                data: rest.get(2).cloned(),
            }),
        })
    }

    /// Encodes the message as a terse frame.
    pub fn encode(&self) -> String {
        codec::encode_frame(&self.to_elements())
    }

    /// Decodes a terse frame.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        Self::from_elements(codec::decode_frame(frame)?)
    }
}
