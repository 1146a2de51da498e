//! Tokio driver for `GameClient`.

use std::{future::Future, time::Duration};

use actorsync_shared::{
    clock::MonotonicClock,
    config::EngineConfig,
    transport::{self, framed, spawn_link, LinkEvent},
};
use anyhow::Context;
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tracing::info;

use crate::client::{ClientHandler, GameClient};

/// A connected client, ready to run.
pub struct ClientRuntime<H: ClientHandler> {
    client: GameClient<H>,
    events: mpsc::UnboundedReceiver<LinkEvent<()>>,
    clock: MonotonicClock,
    substep_ms: u64,
}

impl<H: ClientHandler> ClientRuntime<H> {
    /// Connects to `cfg.server_addr`. A failed connect runs
    /// `on_connect(false)` and returns the error.
    pub async fn connect(cfg: &EngineConfig, mut handler: H) -> anyhow::Result<Self> {
        cfg.validate().context("client config")?;
        let addr = cfg.socket_addr()?;
        info!(server = %addr, "Connecting to server");

        let stream = match transport::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                handler.on_connect(false);
                return Err(e);
            }
        };
        let (reader, writer) = framed(stream);
        let (events_tx, events) = mpsc::unbounded_channel();
        let conn = spawn_link(reader, writer, (), events_tx);

        let client = GameClient::new(cfg, handler, Box::new(conn))?;
        Ok(Self {
            client,
            events,
            clock: MonotonicClock::new(),
            substep_ms: cfg.render_substep_ms,
        })
    }

    pub fn client(&self) -> &GameClient<H> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut GameClient<H> {
        &mut self.client
    }

    /// Runs until the server closes the link or `stop` resolves. Returns the
    /// client after `on_quit` has run.
    pub async fn run_until<F>(self, stop: F) -> anyhow::Result<GameClient<H>>
    where
        F: Future<Output = ()>,
    {
        let Self {
            mut client,
            mut events,
            clock,
            substep_ms,
        } = self;

        let mut substeps = tokio::time::interval(Duration::from_millis(substep_ms));
        substeps.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    client.close();
                    break;
                }
                event = events.recv() => match event {
                    Some(LinkEvent::Frame((), frame)) => {
                        // Undecodable frames are logged and dropped inside.
                        let _ = client.handle_frame(&frame, clock.now_ms());
                    }
                    Some(LinkEvent::Closed(())) | None => break,
                },
                _ = substeps.tick() => {
                    client.tick(clock.now_ms());
                }
            }
        }

        client.disconnected();
        Ok(client)
    }
}
