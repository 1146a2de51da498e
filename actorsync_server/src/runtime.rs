//! Tokio driver for `GameServer`.
//!
//! One task owns the server and `select!`s between new TCP connections,
//! link events (frames and closes, from per-connection reader tasks), the
//! clock poll interval and the caller's stop future.

use std::{collections::HashMap, future::Future, net::SocketAddr, time::Duration};

use actorsync_shared::{
    clock::MonotonicClock,
    config::EngineConfig,
    protocol::SessionId,
    transport::{framed, spawn_link, FrameListener, LinkEvent},
};
use anyhow::Context;
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::server::{GameHandler, GameServer};

/// Driver-local key for one TCP link.
type LinkId = u64;

/// A bound server, ready to run.
pub struct ServerRuntime<H: GameHandler> {
    server: GameServer<H>,
    listener: FrameListener,
    clock: MonotonicClock,
}

impl<H: GameHandler> ServerRuntime<H> {
    /// Validates the config and binds the listen socket.
    pub async fn bind(cfg: EngineConfig, handler: H) -> anyhow::Result<Self> {
        let addr = cfg.socket_addr()?;
        let server = GameServer::new(cfg, handler).context("server config")?;
        let listener = FrameListener::bind(addr).await?;
        Ok(Self {
            server,
            listener,
            clock: MonotonicClock::new(),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn server(&self) -> &GameServer<H> {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut GameServer<H> {
        &mut self.server
    }

    /// Runs until `stop` resolves, then shuts down gracefully and returns
    /// the server for inspection.
    pub async fn run_until<F>(self, stop: F) -> anyhow::Result<GameServer<H>>
    where
        F: Future<Output = ()>,
    {
        let Self {
            mut server,
            listener,
            clock,
        } = self;
        let poll_ms = server.config().poll_interval_ms;
        let grace_ms = server.config().shutdown_grace_ms;

        let (events_tx, mut events) = mpsc::unbounded_channel::<LinkEvent<LinkId>>();
        let mut links: HashMap<LinkId, SessionId> = HashMap::new();
        let mut next_link: LinkId = 0;

        let mut poll = tokio::time::interval(Duration::from_millis(poll_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        server.start(clock.now_ms())?;
        info!(addr = %listener.local_addr()?, "Server listening");
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_link += 1;
                        let (reader, writer) = framed(stream);
                        let conn = spawn_link(reader, writer, next_link, events_tx.clone());
                        match server.accept(Box::new(conn)) {
                            Ok(sid) => {
                                debug!(session = %sid, %peer, "Link bound to session");
                                links.insert(next_link, sid);
                            }
                            Err(e) => info!(%peer, error = %e, "Connection refused"),
                        }
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(event) = events.recv() => match event {
                    LinkEvent::Frame(link, frame) => {
                        if let Some(&sid) = links.get(&link) {
                            // Violations close the session; the link's Closed event follows.
                            let _ = server.handle_frame(sid, &frame);
                        }
                    }
                    LinkEvent::Closed(link) => {
                        if let Some(sid) = links.remove(&link) {
                            server.disconnect(sid);
                        }
                    }
                },
                _ = poll.tick() => {
                    server.tick(clock.now_ms());
                }
            }
        }

        let stats = serde_json::to_string(&server.stats()).context("serialize stats")?;
        info!(%stats, "Shutting down");
        server.shutdown();
        tokio::time::sleep(Duration::from_millis(grace_ms)).await;
        server.close_all();
        Ok(server)
    }
}
