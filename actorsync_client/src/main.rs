//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p actorsync_client -- [--config client.json] [--addr 127.0.0.1:28785]
//!       [--fps 30] [--steer 1.5,-0.5]
//!
//! Headless view of the demo game: connects, steers its ball with a fixed
//! control value and logs what the mirror sees. Ctrl-C disconnects.

use std::env;
use std::path::Path;

use actorsync_client::{
    runtime::ClientRuntime, ClientHandler, ClientMirror, MirrorActor, MirrorBehavior,
};
use actorsync_shared::{config::EngineConfig, protocol::SessionId};
use anyhow::Context;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

struct Args {
    cfg: EngineConfig,
    steer: (f64, f64),
}

fn parse_steer(s: &str) -> anyhow::Result<(f64, f64)> {
    let (dx, dy) = s.split_once(',').context("--steer expects dx,dy")?;
    Ok((dx.trim().parse()?, dy.trim().parse()?))
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => EngineConfig::from_json_file(Path::new(&args[i + 1]))?,
        _ => EngineConfig::default(),
    };
    let mut steer = (0.0, 0.0);
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--fps" if i + 1 < args.len() => {
                cfg.render_fps = args[i + 1].parse().context("--fps")?;
                i += 2;
            }
            "--steer" if i + 1 < args.len() => {
                steer = parse_steer(&args[i + 1])?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(Args { cfg, steer })
}

#[derive(Debug, Deserialize)]
struct BallInfo {
    owner: u64,
}

#[derive(Default)]
struct BallView {
    owner: u64,
}

impl MirrorBehavior for BallView {
    fn on_create(&mut self, actor: &mut MirrorActor, payload: Option<&Value>) {
        match payload.cloned().map(serde_json::from_value::<BallInfo>) {
            Some(Ok(info)) => self.owner = info.owner,
            Some(Err(e)) => warn!(actor = %actor.id(), error = %e, "Bad ball payload"),
            None => {}
        }
        info!(actor = %actor.id(), owner = self.owner, x = actor.x, y = actor.y, "Ball appeared");
    }

    fn on_event(&mut self, actor: &mut MirrorActor, kind: &str, data: Option<&Value>) {
        debug!(actor = %actor.id(), kind, data = ?data, "Ball event");
    }

    fn on_destroy(&mut self, actor: &mut MirrorActor) {
        info!(actor = %actor.id(), owner = self.owner, x = actor.x, y = actor.y, "Ball destroyed");
    }
}

/// Logs a summary once a second of rendering.
struct HeadlessView {
    steer: Value,
    fps: u32,
    frames: u32,
}

impl ClientHandler for HeadlessView {
    fn on_init(&mut self, session: SessionId, fields: &Map<String, Value>) {
        let fields = Value::Object(fields.clone());
        info!(session = %session, fields = %fields, "Joined game");
    }

    fn on_fields(&mut self, fields: &Map<String, Value>) {
        let fields = Value::Object(fields.clone());
        info!(fields = %fields, "Fields changed");
    }

    fn on_control(&mut self) -> Option<Value> {
        Some(self.steer.clone())
    }

    fn on_render(&mut self, mirror: &ClientMirror) {
        self.frames += 1;
        if self.frames % self.fps == 0 {
            for a in mirror.actors() {
                debug!(actor = %a.id(), x = a.x, y = a.y, "Mirror");
            }
            info!(actors = mirror.len(), "Rendering");
        }
    }

    fn on_quit(&mut self, clean: bool) {
        info!(clean, "Left game");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, steer } = parse_args()?;
    info!(server = %cfg.server_addr, fps = cfg.render_fps, "Starting client");

    let view = HeadlessView {
        steer: json!({ "dx": steer.0, "dy": steer.1 }),
        fps: cfg.render_fps.max(1),
        frames: 0,
    };
    let mut runtime = ClientRuntime::connect(&cfg, view).await.context("connect")?;
    runtime
        .client_mut()
        .mirror_mut()
        .register_class("ball", || Box::<BallView>::default());

    let client = runtime
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Ctrl-C handler failed");
            }
        })
        .await?;
    info!(
        renders = client.renders(),
        controls = client.controls_sent(),
        dropped = client.frames_dropped(),
        "Client stopped"
    );
    Ok(())
}
