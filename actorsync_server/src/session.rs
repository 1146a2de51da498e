//! Sessions.
//!
//! One `Session` per connected client: its connection handle, the set of
//! actor ids it currently knows, and the outbound queues filled by the
//! synchronization engine and emptied once per step by `flush`.

use std::collections::{BTreeMap, HashSet};

use actorsync_shared::{
    error::{ProtocolError, TransportError},
    protocol::{ActorDestroyed, ActorEvent, ActorFrame, ActorId, ServerMsg, SessionId},
    transport::Connection,
};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("server full ({max} sessions)")]
    Full { max: usize },
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// Messages waiting for the next flush, one queue per actor message kind.
#[derive(Debug, Default)]
pub struct OutboundQueues {
    pub init: Vec<ActorFrame>,
    pub create: Vec<ActorFrame>,
    pub update: Vec<ActorFrame>,
    pub events: Vec<ActorEvent>,
    pub remove: Vec<ActorId>,
    pub destroy: Vec<ActorDestroyed>,
}

impl OutboundQueues {
    pub fn is_empty(&self) -> bool {
        self.init.is_empty()
            && self.create.is_empty()
            && self.update.is_empty()
            && self.events.is_empty()
            && self.remove.is_empty()
            && self.destroy.is_empty()
    }

    /// Empties every queue into wire messages: at most one batch per actor
    /// queue, in INIT, CREATE, UPDATE, (events), REMOVE, DESTROY order.
    pub fn drain(&mut self) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        if !self.init.is_empty() {
            out.push(ServerMsg::ActorsInit(std::mem::take(&mut self.init)));
        }
        if !self.create.is_empty() {
            out.push(ServerMsg::ActorsCreate(std::mem::take(&mut self.create)));
        }
        if !self.update.is_empty() {
            out.push(ServerMsg::ActorsUpdate(std::mem::take(&mut self.update)));
        }
        out.extend(self.events.drain(..).map(ServerMsg::ActorsEvent));
        if !self.remove.is_empty() {
            out.push(ServerMsg::ActorsRemove(std::mem::take(&mut self.remove)));
        }
        if !self.destroy.is_empty() {
            out.push(ServerMsg::ActorsDestroy(std::mem::take(&mut self.destroy)));
        }
        out
    }
}

pub struct Session {
    id: SessionId,
    conn: Box<dyn Connection>,
    known: HashSet<ActorId>,
    pub(crate) queues: OutboundQueues,
    bytes_sent: u64,
}

impl Session {
    pub(crate) fn new(id: SessionId, conn: Box<dyn Connection>) -> Self {
        Self {
            id,
            conn,
            known: HashSet::new(),
            queues: OutboundQueues::default(),
            bytes_sent: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn knows(&self, actor: ActorId) -> bool {
        self.known.contains(&actor)
    }

    pub fn known_actors(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.known.iter().copied()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn queues(&self) -> &OutboundQueues {
        &self.queues
    }

    pub(crate) fn learn(&mut self, actor: ActorId) {
        self.known.insert(actor);
    }

    pub(crate) fn forget(&mut self, actor: ActorId) {
        self.known.remove(&actor);
    }

    /// Encodes and sends one message, returning the frame length.
    pub(crate) fn send(&mut self, msg: &ServerMsg) -> Result<usize, TransportError> {
        let frame = msg.encode();
        self.conn.send(&frame)?;
        self.bytes_sent += frame.len() as u64;
        Ok(frame.len())
    }

    /// Sends everything queued and clears the queues.
    pub(crate) fn flush(&mut self) -> Result<usize, TransportError> {
        let mut total = 0;
        for msg in self.queues.drain() {
            total += self.send(&msg)?;
        }
        Ok(total)
    }

    pub(crate) fn close(&mut self) {
        self.conn.close();
    }
}

/// Active sessions in id order.
#[derive(Default)]
pub struct SessionTable {
    next_id: u64,
    sessions: BTreeMap<SessionId, Session>,
    bytes_sent: u64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub(crate) fn insert(&mut self, conn: Box<dyn Connection>) -> SessionId {
        self.next_id += 1;
        let id = SessionId(self.next_id);
        self.sessions.insert(id, Session::new(id, conn));
        id
    }

    pub(crate) fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    /// Total bytes sent, including sessions that have since left.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Sends a message to one session.
    pub(crate) fn send_to(&mut self, id: SessionId, msg: &ServerMsg) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        let n = session.send(msg)?;
        self.bytes_sent += n as u64;
        Ok(())
    }

    /// Sends a message to every session; returns the sessions whose send failed.
    pub(crate) fn broadcast(&mut self, msg: &ServerMsg) -> Vec<SessionId> {
        let ids: Vec<SessionId> = self.ids().collect();
        let mut failed = Vec::new();
        for id in ids {
            if let Err(e) = self.send_to(id, msg) {
                warn!(session = %id, kind = ?msg.msg_type(), error = %e, "Broadcast send failed");
                failed.push(id);
            }
        }
        failed
    }

    /// Flushes every session's queues; returns the sessions whose send failed.
    pub(crate) fn flush_all(&mut self) -> Vec<SessionId> {
        let mut failed = Vec::new();
        for session in self.sessions.values_mut() {
            match session.flush() {
                Ok(n) => self.bytes_sent += n as u64,
                Err(e) => {
                    warn!(session = %session.id(), error = %e, "Flush failed");
                    failed.push(session.id());
                }
            }
        }
        failed
    }
}
