//! Demo game used by the standalone binary.
//!
//! Every session owns one ball that bounces inside a square arena. Clients
//! steer their ball with `{dx, dy}` control messages.

use std::collections::HashMap;

use actorsync_shared::protocol::{ActorId, SessionId};
use anyhow::Context;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    actor::{ActorBehavior, ActorContext, ActorCore},
    server::{GameHandler, GameState},
};

pub const BALL: &str = "ball";
pub const ARENA_SIZE: f64 = 100.0;
pub const MAX_SPEED: f64 = 5.0;

#[derive(Debug, Deserialize)]
struct BallSpawn {
    owner: u64,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

#[derive(Debug, Deserialize)]
struct Steer {
    dx: f64,
    dy: f64,
}

#[derive(Debug, Default)]
struct Ball {
    owner: u64,
    bounces: u64,
}

impl ActorBehavior for Ball {
    fn on_create(&mut self, actor: &mut ActorCore, payload: &Value) -> anyhow::Result<()> {
        let spawn: BallSpawn = serde_json::from_value(payload.clone()).context("ball payload")?;
        self.owner = spawn.owner;
        actor.set_position(spawn.x, spawn.y);
        Ok(())
    }

    fn on_update(&mut self, actor: &mut ActorCore, _ctx: &mut ActorContext<'_>) -> anyhow::Result<()> {
        actor.advance();
        let mut bounced = false;
        if actor.x < 0.0 || actor.x > ARENA_SIZE {
            actor.x = actor.x.clamp(0.0, ARENA_SIZE);
            actor.mx = -actor.mx;
            bounced = true;
        }
        if actor.y < 0.0 || actor.y > ARENA_SIZE {
            actor.y = actor.y.clamp(0.0, ARENA_SIZE);
            actor.my = -actor.my;
            bounced = true;
        }
        if bounced {
            self.bounces += 1;
            actor.mark_updated();
            actor.event("bounce", Some(json!({ "n": self.bounces })));
        }
        Ok(())
    }

    fn serialize(&self, _actor: &ActorCore, full: bool) -> anyhow::Result<Option<Value>> {
        Ok(full.then(|| json!({ "owner": self.owner })))
    }
}

/// One ball per connected session.
#[derive(Debug, Default)]
pub struct DemoGame {
    balls: HashMap<SessionId, ActorId>,
}

impl DemoGame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ball_of(&self, session: SessionId) -> Option<ActorId> {
        self.balls.get(&session).copied()
    }
}

impl GameHandler for DemoGame {
    fn on_init(&mut self, game: &mut GameState) -> anyhow::Result<()> {
        game.registry.register_class(BALL, || Box::<Ball>::default());
        game.fields.set("arena", json!(ARENA_SIZE));
        game.fields.set("players", json!({}));
        Ok(())
    }

    fn on_connect(&mut self, session: SessionId, game: &mut GameState) {
        let center = ARENA_SIZE / 2.0;
        match game.registry.create(
            BALL,
            json!({ "owner": session.0, "x": center, "y": center }),
        ) {
            Ok(id) => {
                self.balls.insert(session, id);
                game.fields.set_item("players", session.to_string(), json!(id.0));
            }
            Err(e) => debug!(session = %session, error = %e, "No ball for session"),
        }
    }

    fn on_message(&mut self, session: SessionId, msg: Value, game: &mut GameState) -> anyhow::Result<()> {
        let steer: Steer = serde_json::from_value(msg).context("steer message")?;
        anyhow::ensure!(
            steer.dx.is_finite() && steer.dy.is_finite(),
            "non-finite steering"
        );
        if let Some(ball) = self.ball_of(session).and_then(|id| game.registry.get_mut(id)) {
            ball.set_velocity(
                steer.dx.clamp(-MAX_SPEED, MAX_SPEED),
                steer.dy.clamp(-MAX_SPEED, MAX_SPEED),
            );
        }
        Ok(())
    }

    fn on_disconnect(&mut self, session: SessionId, game: &mut GameState) {
        if let Some(id) = self.balls.remove(&session) {
            game.registry.destroy(id);
        }
        game.fields.remove_item("players", &session.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::GameServer;
    use actorsync_shared::{config::EngineConfig, transport::MemoryConnection};

    #[test]
    fn ball_follows_steering_and_dies_with_its_session() {
        let mut server = GameServer::new(EngineConfig::default(), DemoGame::new()).unwrap();
        server.start(0).unwrap();
        let conn = MemoryConnection::new();
        let sid = server.accept(conn.boxed()).unwrap();
        let ball = server.handler().ball_of(sid).unwrap();

        server.handle_frame(sid, "{dx:9,dy:-1}").unwrap();
        server.tick(0);
        let core = server.state().registry.get(ball).unwrap();
        assert_eq!((core.mx, core.my), (MAX_SPEED, -1.0));
        assert_eq!((core.x, core.y), (55.0, 49.0));

        server.disconnect(sid);
        assert_eq!(server.state().registry.actor_count(), 0);
    }

    #[test]
    fn malformed_steering_is_a_violation() {
        let mut server = GameServer::new(EngineConfig::default(), DemoGame::new()).unwrap();
        server.start(0).unwrap();
        let conn = MemoryConnection::new();
        let sid = server.accept(conn.boxed()).unwrap();
        assert!(server.handle_frame(sid, "{dx:\"fast\"}").is_err());
        assert!(conn.is_closed());
    }
}
