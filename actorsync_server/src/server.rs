//! Server implementation.
//!
//! An authoritative fixed-timestep loop. `GameServer` is synchronous and owns
//! every piece of game state; a driver (see `runtime`) feeds it connections,
//! inbound frames and the current time.
//!
//! Each step:
//! 1. Broadcast shared fields if they changed
//! 2. Per-session hook
//! 3. Update every actor
//! 4. Game step hook
//! 5. Reconcile actors against every session's known set
//! 6. Flush session queues
//! 7. Drop destroyed actors
//! 8. Disconnect sessions whose flush failed
//!
//! Determinism notes:
//! - Simulation time advances in whole tick intervals.
//! - Actors and sessions are iterated in id order.

use actorsync_shared::{
    clock::{Millis, SimClock},
    codec,
    config::EngineConfig,
    error::{ConfigError, ProtocolError},
    fields::SharedFields,
    protocol::{ServerMsg, SessionId},
    transport::Connection,
};
use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    registry::ActorRegistry,
    session::{SessionError, SessionTable},
    sync,
};

/// Game code hooks. Every method has a no-op default.
pub trait GameHandler {
    /// Runs once when the server starts, before the first step.
    fn on_init(&mut self, _game: &mut GameState) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs every step after actors have updated.
    fn on_step(&mut self, _game: &mut GameState) {}

    /// Runs after a session was accepted and sent its initial state.
    fn on_connect(&mut self, _session: SessionId, _game: &mut GameState) {}

    /// Runs every step for every session, before actors update.
    fn on_session_step(&mut self, _session: SessionId, _game: &mut GameState) {}

    /// Handles a decoded client message. An error disconnects the session.
    fn on_message(
        &mut self,
        _session: SessionId,
        _msg: Value,
        _game: &mut GameState,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once after a session is gone, whatever the cause.
    fn on_disconnect(&mut self, _session: SessionId, _game: &mut GameState) {}
}

impl GameHandler for () {}

/// Everything game code may touch from a hook.
pub struct GameState {
    pub registry: ActorRegistry,
    pub fields: SharedFields,
    sessions: SessionTable,
    tick_interval_ms: Millis,
    now_ms: Millis,
}

impl GameState {
    fn new(tick_interval_ms: Millis) -> Self {
        Self {
            registry: ActorRegistry::new(),
            fields: SharedFields::new(),
            sessions: SessionTable::new(),
            tick_interval_ms,
            now_ms: 0,
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn tick_interval_ms(&self) -> Millis {
        self.tick_interval_ms
    }

    /// Simulation time of the current step.
    pub fn now_ms(&self) -> Millis {
        self.now_ms
    }
}

/// Counters for logs and tests; serialized as JSON in the shutdown log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub steps: u64,
    pub clients: usize,
    pub actors: usize,
    pub bytes_sent: u64,
}

/// Authoritative game server.
pub struct GameServer<H: GameHandler> {
    cfg: EngineConfig,
    handler: H,
    state: GameState,
    clock: SimClock,
}

impl<H: GameHandler> GameServer<H> {
    /// Creates a server. The config is validated here, before anything can
    /// connect.
    pub fn new(cfg: EngineConfig, handler: H) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            state: GameState::new(cfg.tick_interval_ms),
            clock: SimClock::new(cfg.tick_interval_ms),
            cfg,
            handler,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut GameState {
        &mut self.state
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_running()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            steps: self.clock.steps(),
            clients: self.state.sessions.len(),
            actors: self.state.registry.actor_count(),
            bytes_sent: self.state.sessions.bytes_sent(),
        }
    }

    /// Runs the init hook and starts the simulation clock at `now`.
    pub fn start(&mut self, now: Millis) -> anyhow::Result<()> {
        self.state.now_ms = now;
        self.handler
            .on_init(&mut self.state)
            .context("game init hook")?;
        self.clock.start(now);
        info!(
            tick_ms = self.cfg.tick_interval_ms,
            max_clients = self.cfg.max_clients,
            "Simulation started"
        );
        Ok(())
    }

    /// Runs every step due at `now`. Returns how many ran.
    pub fn tick(&mut self, now: Millis) -> u32 {
        let mut n = 0;
        while let Some(t) = self.clock.next_step(now) {
            self.step(t);
            n += 1;
        }
        n
    }

    /// Executes one fixed simulation step at simulation time `t`.
    fn step(&mut self, t: Millis) {
        self.state.now_ms = t;
        self.publish_fields();

        let ids: Vec<SessionId> = self.state.sessions.ids().collect();
        for sid in ids {
            self.handler.on_session_step(sid, &mut self.state);
        }

        self.state.registry.update_all(t);
        self.handler.on_step(&mut self.state);

        sync::reconcile(&mut self.state.registry, &mut self.state.sessions);
        let failed = self.state.sessions.flush_all();
        self.state.registry.sweep();

        // After the sweep: actors destroyed by the disconnect hook must stay
        // around for the next reconcile to send their DESTROY.
        for sid in failed {
            warn!(session = %sid, "Send failed, dropping session");
            self.disconnect(sid);
        }
    }

    /// Broadcasts GAME_FIELDS if the shared fields changed.
    fn publish_fields(&mut self) {
        let Some(fields) = self.state.fields.take_dirty() else {
            return;
        };
        let failed = self.state.sessions.broadcast(&ServerMsg::GameFields(fields));
        for sid in failed {
            warn!(session = %sid, "Send failed, dropping session");
            self.disconnect(sid);
        }
    }

    /// Registers a new connection. Full servers close it and refuse.
    pub fn accept(&mut self, mut conn: Box<dyn Connection>) -> Result<SessionId, SessionError> {
        let max = self.cfg.max_clients;
        if self.state.sessions.len() >= max {
            conn.close();
            warn!(max, "Server full, connection refused");
            return Err(SessionError::Full { max });
        }

        let sid = self.state.sessions.insert(conn);
        let start = ServerMsg::GameStart {
            session_id: sid,
            tick_interval_ms: self.cfg.tick_interval_ms,
            fields: self.state.fields.snapshot().clone(),
        };
        if let Err(e) = self.state.sessions.send_to(sid, &start) {
            self.state.sessions.remove(sid);
            warn!(session = %sid, error = %e, "GAME_START failed, dropping session");
            return Err(e);
        }

        if let Some(session) = self.state.sessions.get_mut(sid) {
            sync::introduce(&mut self.state.registry, session);
        }
        info!(session = %sid, clients = self.state.sessions.len(), "Client connected");
        self.handler.on_connect(sid, &mut self.state);
        Ok(sid)
    }

    /// Handles one inbound frame. Violations close the session.
    pub fn handle_frame(&mut self, sid: SessionId, frame: &str) -> Result<(), SessionError> {
        if self.state.sessions.get(sid).is_none() {
            debug!(session = %sid, "Frame for unknown session ignored");
            return Err(SessionError::UnknownSession(sid));
        }

        let len = frame.chars().count();
        let decoded = if len > self.cfg.max_message_len {
            Err(ProtocolError::Oversized {
                len,
                max: self.cfg.max_message_len,
            })
        } else {
            codec::decode_value(frame)
        };
        let msg = match decoded {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session = %sid, error = %e, "Protocol violation, closing");
                self.close_session(sid);
                return Err(e.into());
            }
        };

        if let Err(e) = self.handler.on_message(sid, msg, &mut self.state) {
            warn!(session = %sid, error = %e, "Message rejected, closing");
            self.close_session(sid);
            return Err(SessionError::Rejected(format!("{e:#}")));
        }
        Ok(())
    }

    fn close_session(&mut self, sid: SessionId) {
        if let Some(session) = self.state.sessions.get_mut(sid) {
            session.close();
        }
        self.disconnect(sid);
    }

    /// Drops a session and runs the disconnect hook. Idempotent.
    pub fn disconnect(&mut self, sid: SessionId) {
        if self.state.sessions.remove(sid).is_none() {
            return;
        }
        info!(session = %sid, clients = self.state.sessions.len(), "Client disconnected");
        self.handler.on_disconnect(sid, &mut self.state);
    }

    /// Stops the simulation: every actor is destroyed and the DESTROY batch
    /// flushed, then GAME_SHUTDOWN is broadcast. Connections stay open until
    /// `close_all`.
    pub fn shutdown(&mut self) {
        if !self.clock.is_running() {
            return;
        }
        self.clock.stop();
        let destroyed = self.state.registry.destroy_all();
        sync::reconcile(&mut self.state.registry, &mut self.state.sessions);
        let mut failed = self.state.sessions.flush_all();
        self.state.registry.sweep();
        failed.extend(self.state.sessions.broadcast(&ServerMsg::GameShutdown));
        for sid in failed {
            self.disconnect(sid);
        }
        info!(destroyed, "Simulation stopped");
    }

    /// Closes every connection and drops every session.
    pub fn close_all(&mut self) {
        let ids: Vec<SessionId> = self.state.sessions.ids().collect();
        for sid in ids {
            self.close_session(sid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorBehavior, ActorContext, ActorCore};
    use actorsync_shared::transport::MemoryConnection;
    use serde_json::json;

    struct Drifter;

    impl ActorBehavior for Drifter {
        fn on_update(&mut self, actor: &mut ActorCore, _ctx: &mut ActorContext<'_>) -> anyhow::Result<()> {
            actor.advance();
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        connected: Vec<SessionId>,
        disconnected: Vec<SessionId>,
        messages: Vec<Value>,
    }

    impl GameHandler for Recorder {
        fn on_init(&mut self, game: &mut GameState) -> anyhow::Result<()> {
            game.registry.register_class("drifter", || Box::new(Drifter));
            Ok(())
        }

        fn on_connect(&mut self, session: SessionId, _game: &mut GameState) {
            self.connected.push(session);
        }

        fn on_message(&mut self, _session: SessionId, msg: Value, _game: &mut GameState) -> anyhow::Result<()> {
            anyhow::ensure!(msg.get("bad").is_none(), "bad message");
            self.messages.push(msg);
            Ok(())
        }

        fn on_disconnect(&mut self, session: SessionId, _game: &mut GameState) {
            self.disconnected.push(session);
        }
    }

    fn server(max_clients: usize) -> GameServer<Recorder> {
        let cfg = EngineConfig {
            max_clients,
            ..Default::default()
        };
        let mut server = GameServer::new(cfg, Recorder::default()).unwrap();
        server.start(0).unwrap();
        server
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let cfg = EngineConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            GameServer::new(cfg, ()),
            Err(ConfigError::Zero("tick_interval_ms"))
        ));
    }

    #[test]
    fn accept_sends_game_start_immediately() {
        let mut server = server(4);
        server.state_mut().fields.set("round", json!(1));
        let conn = MemoryConnection::new();
        let sid = server.accept(conn.boxed()).unwrap();
        assert_eq!(sid, SessionId(1));
        assert_eq!(conn.frames(), vec!["1,1,50,{round:1}".to_string()]);
        assert_eq!(server.handler().connected, vec![sid]);
    }

    #[test]
    fn full_server_closes_the_connection() {
        let mut server = server(1);
        server.accept(MemoryConnection::new().boxed()).unwrap();
        let extra = MemoryConnection::new();
        assert!(matches!(
            server.accept(extra.boxed()),
            Err(SessionError::Full { max: 1 })
        ));
        assert!(extra.is_closed());
        assert!(extra.frames().is_empty());
        assert_eq!(server.state().client_count(), 1);
    }

    #[test]
    fn failed_game_start_reports_the_transport_error() {
        let mut server = server(4);
        let conn = MemoryConnection::new();
        conn.fail_sends(true);
        assert!(matches!(
            server.accept(conn.boxed()),
            Err(SessionError::Transport(_))
        ));
        assert_eq!(server.state().client_count(), 0);
        assert!(server.handler().connected.is_empty());
    }

    #[test]
    fn stats_serialize_as_json() {
        let mut server = server(4);
        server.accept(MemoryConnection::new().boxed()).unwrap();
        server.tick(50);
        let stats = serde_json::to_value(server.stats()).unwrap();
        assert_eq!(stats["steps"], json!(2));
        assert_eq!(stats["clients"], json!(1));
        assert!(stats["bytes_sent"].as_u64().unwrap() > 0);
    }

    #[test]
    fn rejected_message_disconnects_only_that_session() {
        let mut server = server(4);
        let a = MemoryConnection::new();
        let b = MemoryConnection::new();
        let sa = server.accept(a.boxed()).unwrap();
        let sb = server.accept(b.boxed()).unwrap();

        server.handle_frame(sa, "{up:true}").unwrap();
        assert!(server.handle_frame(sb, "{bad:1}").is_err());
        assert!(b.is_closed());
        assert!(!a.is_closed());
        assert_eq!(server.handler().messages, vec![json!({"up": true})]);
        assert_eq!(server.handler().disconnected, vec![sb]);

        server.disconnect(sb);
        assert_eq!(server.handler().disconnected, vec![sb]);
    }

    #[test]
    fn failed_send_drops_the_session_at_flush() {
        let mut server = server(4);
        let conn = MemoryConnection::new();
        let sid = server.accept(conn.boxed()).unwrap();
        server
            .state_mut()
            .registry
            .create("drifter", json!(null))
            .unwrap();
        conn.fail_sends(true);
        server.tick(0);
        assert_eq!(server.state().client_count(), 0);
        assert_eq!(server.handler().disconnected, vec![sid]);
    }

    #[test]
    fn shutdown_destroys_actors_then_announces() {
        let mut server = server(4);
        let conn = MemoryConnection::new();
        server.accept(conn.boxed()).unwrap();
        server
            .state_mut()
            .registry
            .create("drifter", json!(null))
            .unwrap();
        server.tick(0);
        conn.take_frames();

        server.shutdown();
        assert_eq!(
            conn.take_frames(),
            vec!["8,[1,0.0,0.0]".to_string(), "3".to_string()]
        );
        assert_eq!(server.state().registry.actor_count(), 0);
        assert_eq!(server.tick(1000), 0);

        server.shutdown();
        assert!(conn.frames().is_empty());
        server.close_all();
        assert!(conn.is_closed());
    }
}
