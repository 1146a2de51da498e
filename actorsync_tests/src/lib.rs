//! Test support for the integration suites.
//!
//! - `TestGame`: a handler with a few scripted actor classes
//! - `WireChecker`: replays one session's frames and verifies that every
//!   actor message refers to an id the session was introduced to

use std::collections::BTreeSet;

use actorsync_server::{ActorBehavior, ActorContext, ActorCore, GameHandler, GameServer, GameState};
use actorsync_shared::{
    config::EngineConfig,
    protocol::{ActorId, MsgType, ServerMsg},
};
use serde_json::Value;

/// Never moves.
pub struct Rock;

impl ActorBehavior for Rock {}

/// Moves by its velocity every step; the velocity comes from the payload
/// `{mx, my}`.
pub struct Mover;

impl ActorBehavior for Mover {
    fn on_create(&mut self, actor: &mut ActorCore, payload: &Value) -> anyhow::Result<()> {
        actor.mx = payload["mx"].as_f64().unwrap_or(0.0);
        actor.my = payload["my"].as_f64().unwrap_or(0.0);
        Ok(())
    }

    fn on_update(&mut self, actor: &mut ActorCore, _ctx: &mut ActorContext<'_>) -> anyhow::Result<()> {
        actor.advance();
        Ok(())
    }
}

/// Emits a `ping` event every step.
pub struct Pinger;

impl ActorBehavior for Pinger {
    fn on_update(&mut self, actor: &mut ActorCore, _ctx: &mut ActorContext<'_>) -> anyhow::Result<()> {
        actor.event("ping", None);
        Ok(())
    }
}

/// Fails to serialize; used to check that one bad actor does not stop a step.
pub struct Unserializable;

impl ActorBehavior for Unserializable {
    fn serialize(&self, _actor: &ActorCore, _full: bool) -> anyhow::Result<Option<Value>> {
        anyhow::bail!("no wire form")
    }
}

/// Registers `rock`, `mover`, `pinger` and `broken`; otherwise inert.
#[derive(Debug, Default)]
pub struct TestGame;

impl GameHandler for TestGame {
    fn on_init(&mut self, game: &mut GameState) -> anyhow::Result<()> {
        game.registry.register_class("rock", || Box::new(Rock));
        game.registry.register_class("mover", || Box::new(Mover));
        game.registry.register_class("pinger", || Box::new(Pinger));
        game.registry.register_class("broken", || Box::new(Unserializable));
        Ok(())
    }
}

/// A started test server with the default config overridden by `f`.
pub fn test_server(f: impl FnOnce(&mut EngineConfig)) -> GameServer<TestGame> {
    let mut cfg = EngineConfig::default();
    f(&mut cfg);
    let mut server = match GameServer::new(cfg, TestGame) {
        Ok(server) => server,
        Err(e) => panic!("test config rejected: {e}"),
    };
    if let Err(e) = server.start(0) {
        panic!("test server failed to start: {e:#}");
    }
    server
}

/// Installs a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Decodes frames and returns their type codes, in order.
pub fn kinds(frames: &[String]) -> Vec<MsgType> {
    frames
        .iter()
        .filter_map(|f| ServerMsg::decode(f).ok())
        .map(|m| m.msg_type())
        .collect()
}

/// Tracks the actors a session has been introduced to, as seen on the wire.
#[derive(Debug, Default)]
pub struct WireChecker {
    known: BTreeSet<ActorId>,
    violations: Vec<String>,
}

impl WireChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known(&self) -> &BTreeSet<ActorId> {
        &self.known
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Feeds one frame in arrival order.
    pub fn feed(&mut self, frame: &str) {
        let msg = match ServerMsg::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                self.violations.push(format!("undecodable {frame:?}: {e}"));
                return;
            }
        };
        match msg {
            ServerMsg::ActorsInit(frames) | ServerMsg::ActorsCreate(frames) => {
                for f in frames {
                    if f.class.is_none() {
                        self.violations.push(format!("introduction of {} without class", f.id));
                    }
                    if !self.known.insert(f.id) {
                        self.violations.push(format!("{} introduced twice", f.id));
                    }
                }
            }
            ServerMsg::ActorsUpdate(frames) => {
                for f in frames {
                    self.require(f.id, "UPDATE");
                }
            }
            ServerMsg::ActorsRemove(ids) => {
                for id in ids {
                    self.require(id, "REMOVE");
                    self.known.remove(&id);
                }
            }
            ServerMsg::ActorsDestroy(records) => {
                for r in records {
                    self.require(r.id, "DESTROY");
                    self.known.remove(&r.id);
                }
            }
            ServerMsg::ActorsEvent(ev) => self.require(ev.id, "EVENT"),
            ServerMsg::GameStart { .. } | ServerMsg::GameFields(_) | ServerMsg::GameShutdown => {}
        }
    }

    pub fn feed_all<'a>(&mut self, frames: impl IntoIterator<Item = &'a String>) {
        for f in frames {
            self.feed(f);
        }
    }

    fn require(&mut self, id: ActorId, what: &str) {
        if !self.known.contains(&id) {
            self.violations.push(format!("{what} for unintroduced {id}"));
        }
    }
}
