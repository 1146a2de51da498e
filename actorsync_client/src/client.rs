//! Client implementation.
//!
//! The client maintains:
//! - The mirror of every actor the server introduced to this session
//! - A render clock running fixed substeps between server ticks
//! - Deduplicated control messages, sent on render substeps
//!
//! Like the server core it is synchronous; the driver in `runtime` feeds it
//! frames and the current time.

use actorsync_shared::{
    clock::{Millis, SimClock},
    config::EngineConfig,
    error::{ConfigError, ProtocolError},
    protocol::{ServerMsg, SessionId},
    transport::Connection,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{control::ControlChannel, interp::Interpolator, mirror::ClientMirror};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Link open, waiting for GAME_START.
    Connected,
    /// GAME_START received, rendering.
    Running,
    /// Link gone.
    Closed,
}

/// Game code hooks. Every method has a no-op default.
pub trait ClientHandler {
    /// Link established (`true`) or connecting failed (`false`).
    fn on_connect(&mut self, _success: bool) {}

    /// GAME_START arrived.
    fn on_init(&mut self, _session: SessionId, _fields: &Map<String, Value>) {}

    /// GAME_FIELDS arrived.
    fn on_fields(&mut self, _fields: &Map<String, Value>) {}

    /// Current control state, polled on every render substep.
    fn on_control(&mut self) -> Option<Value> {
        None
    }

    fn on_render(&mut self, _mirror: &ClientMirror) {}

    /// The link is gone. `clean` if the server announced shutdown first.
    fn on_quit(&mut self, _clean: bool) {}
}

impl ClientHandler for () {}

/// High-level game client.
pub struct GameClient<H: ClientHandler> {
    handler: H,
    conn: Box<dyn Connection>,
    state: ClientState,

    session_id: Option<SessionId>,
    tick_interval_ms: Millis,
    substep_ms: Millis,
    frame_ms: Millis,

    mirror: ClientMirror,
    interp: Interpolator,
    render_clock: SimClock,
    last_render: Millis,
    renders: u64,

    control: ControlChannel,
    shutdown_seen: bool,
    frames_dropped: u64,
}

impl<H: ClientHandler> GameClient<H> {
    /// Wraps an open link. Runs `on_connect(true)`.
    pub fn new(cfg: &EngineConfig, mut handler: H, conn: Box<dyn Connection>) -> Result<Self, ConfigError> {
        cfg.validate()?;
        handler.on_connect(true);
        Ok(Self {
            handler,
            conn,
            state: ClientState::Connected,
            session_id: None,
            tick_interval_ms: cfg.tick_interval_ms,
            substep_ms: cfg.render_substep_ms,
            frame_ms: cfg.frame_time_ms(),
            mirror: ClientMirror::new(),
            interp: Interpolator::default(),
            render_clock: SimClock::new(cfg.render_substep_ms),
            last_render: 0,
            renders: 0,
            control: ControlChannel::new(),
            shutdown_seen: false,
            frames_dropped: 0,
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn tick_interval_ms(&self) -> Millis {
        self.tick_interval_ms
    }

    pub fn interpolator(&self) -> Interpolator {
        self.interp
    }

    pub fn mirror(&self) -> &ClientMirror {
        &self.mirror
    }

    /// Class registration goes through here.
    pub fn mirror_mut(&mut self) -> &mut ClientMirror {
        &mut self.mirror
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn renders(&self) -> u64 {
        self.renders
    }

    pub fn controls_sent(&self) -> u64 {
        self.control.sent()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Applies one server frame. Undecodable frames are dropped with a
    /// warning; the link stays up.
    pub fn handle_frame(&mut self, frame: &str, now: Millis) -> Result<(), ProtocolError> {
        if self.state == ClientState::Closed {
            return Ok(());
        }
        let msg = match ServerMsg::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                self.frames_dropped += 1;
                warn!(error = %e, "Dropping undecodable frame");
                return Err(e);
            }
        };

        match msg {
            ServerMsg::GameStart {
                session_id,
                tick_interval_ms,
                fields,
            } => {
                self.session_id = Some(session_id);
                self.tick_interval_ms = tick_interval_ms;
                self.interp = Interpolator::from_intervals(tick_interval_ms, self.substep_ms);
                self.render_clock.start(now);
                self.last_render = now;
                self.state = ClientState::Running;
                info!(session = %session_id, tick_ms = tick_interval_ms, interp_steps = self.interp.steps(), "Game started");
                self.handler.on_init(session_id, &fields);
            }
            ServerMsg::GameFields(fields) => self.handler.on_fields(&fields),
            ServerMsg::GameShutdown => {
                info!("Server is shutting down");
                self.shutdown_seen = true;
            }
            ServerMsg::ActorsInit(frames) | ServerMsg::ActorsCreate(frames) => {
                for f in &frames {
                    self.mirror.introduce(f);
                }
            }
            ServerMsg::ActorsUpdate(frames) => {
                for f in &frames {
                    self.mirror.update(f);
                }
            }
            ServerMsg::ActorsRemove(ids) => {
                for id in ids {
                    self.mirror.remove(id);
                }
            }
            ServerMsg::ActorsDestroy(records) => {
                for r in &records {
                    self.mirror.destroy(r);
                }
            }
            ServerMsg::ActorsEvent(event) => self.mirror.event(&event),
        }
        Ok(())
    }

    /// Runs every render substep due at `now`. Returns how many ran.
    pub fn tick(&mut self, now: Millis) -> u32 {
        let mut n = 0;
        while let Some(t) = self.render_clock.next_step(now) {
            self.render_step(t);
            n += 1;
        }
        n
    }

    fn render_step(&mut self, t: Millis) {
        let render = t.saturating_sub(self.last_render) >= self.frame_ms;
        if render {
            self.last_render = t;
            self.renders += 1;
            if let Some(control) = self.handler.on_control() {
                if let Some(frame) = self.control.outgoing(control) {
                    if let Err(e) = self.conn.send(&frame) {
                        debug!(error = %e, "Control send failed");
                    }
                }
            }
            self.handler.on_render(&self.mirror);
        }
        self.mirror.interleave(&self.interp, render);
    }

    /// Asks the transport to close the link.
    pub fn close(&mut self) {
        self.conn.close();
    }

    /// The link is gone: mirrors are destroyed and `on_quit` runs once.
    pub fn disconnected(&mut self) {
        if self.state == ClientState::Closed {
            return;
        }
        self.state = ClientState::Closed;
        self.render_clock.stop();
        self.mirror.destroy_all();
        info!(clean = self.shutdown_seen, "Disconnected");
        self.handler.on_quit(self.shutdown_seen);
    }
}
