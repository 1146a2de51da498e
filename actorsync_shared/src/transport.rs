//! Transport plumbing.
//!
//! The synchronous core only sees [`Connection`]: send a text frame, close.
//! The drivers bridge that to tokio IO with one reader task and one writer
//! task per link; frames travel as a `u32` big-endian length followed by
//! UTF-8 bytes. [`MemoryConnection`] records frames in memory for tests and
//! headless setups.

use std::{cell::RefCell, net::SocketAddr, rc::Rc};

use anyhow::Context;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
};
use tracing::debug;

use crate::error::TransportError;

/// Hard ceiling on a single frame, independent of the configured message cap.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// A message-framed, ordered, bidirectional link as seen by the core.
pub trait Connection {
    fn send(&mut self, frame: &str) -> Result<(), TransportError>;
    fn close(&mut self);
}

// ─── In-memory ───

#[derive(Debug, Default)]
struct MemoryState {
    frames: Vec<String>,
    closed: bool,
    fail_sends: bool,
}

/// Records sent frames. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnection {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boxed clone, ready to hand to a server or client.
    pub fn boxed(&self) -> Box<dyn Connection> {
        Box::new(self.clone())
    }

    pub fn frames(&self) -> Vec<String> {
        self.state.borrow().frames.clone()
    }

    /// Returns and forgets everything sent so far.
    pub fn take_frames(&self) -> Vec<String> {
        std::mem::take(&mut self.state.borrow_mut().frames)
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Makes every following send fail, as a dropped peer would.
    pub fn fail_sends(&self, fail: bool) {
        self.state.borrow_mut().fail_sends = fail;
    }
}

impl Connection for MemoryConnection {
    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.fail_sends {
            return Err(TransportError::Send("peer unreachable".into()));
        }
        state.frames.push(frame.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}

// ─── Channel-backed ───

/// Work item for a link's writer task.
#[derive(Debug)]
pub enum Outbound {
    Frame(String),
    Close,
}

/// [`Connection`] that hands frames to a writer task.
#[derive(Debug)]
pub struct ChannelConnection {
    tx: mpsc::UnboundedSender<Outbound>,
    closed: bool,
}

impl ChannelConnection {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx, closed: false }
    }
}

impl Connection for ChannelConnection {
    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(Outbound::Frame(frame.to_string()))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.tx.send(Outbound::Close);
        }
    }
}

/// Inbound notifications from link tasks, tagged with the driver's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent<K> {
    Frame(K, String),
    Closed(K),
}

// ─── Framed IO ───

#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` on a clean end of stream.
    async fn recv_frame(&mut self) -> anyhow::Result<Option<String>>;
}

#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: &str) -> anyhow::Result<()>;
    async fn shutdown(&mut self) -> anyhow::Result<()>;
}

/// Length-prefixed frame reader.
#[derive(Debug)]
pub struct FrameReader<R> {
    io: R,
    max_frame: usize,
}

impl<R> FrameReader<R> {
    pub fn new(io: R, max_frame: usize) -> Self {
        Self { io, max_frame }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for FrameReader<R> {
    async fn recv_frame(&mut self) -> anyhow::Result<Option<String>> {
        let mut len_buf = [0u8; 4];
        match self.io.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context("read frame len"),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_frame {
            anyhow::bail!("frame of {len} bytes exceeds {} byte ceiling", self.max_frame);
        }
        let mut payload = vec![0u8; len];
        self.io
            .read_exact(&mut payload)
            .await
            .context("read frame payload")?;
        String::from_utf8(payload).context("frame is not utf-8").map(Some)
    }
}

/// Length-prefixed frame writer.
#[derive(Debug)]
pub struct FrameWriter<W> {
    io: W,
}

impl<W> FrameWriter<W> {
    pub fn new(io: W) -> Self {
        Self { io }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for FrameWriter<W> {
    async fn send_frame(&mut self, frame: &str) -> anyhow::Result<()> {
        let payload = frame.as_bytes();
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(payload);
        self.io.write_all(&buf).await.context("write frame")?;
        Ok(())
    }

    async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.io.shutdown().await.context("shutdown writer")
    }
}

/// Splits any byte stream into a frame reader and writer.
pub fn framed<T>(io: T) -> (FrameReader<ReadHalf<T>>, FrameWriter<WriteHalf<T>>)
where
    T: AsyncRead + AsyncWrite,
{
    let (r, w) = tokio::io::split(io);
    (FrameReader::new(r, MAX_FRAME_LEN), FrameWriter::new(w))
}

/// Spawns reader and writer tasks for a link and returns the core's handle.
///
/// Frames arrive on `events` tagged with `key`; exactly one
/// `LinkEvent::Closed(key)` follows when the link ends from either side.
pub fn spawn_link<K, R, W>(
    reader: R,
    writer: W,
    key: K,
    events: mpsc::UnboundedSender<LinkEvent<K>>,
) -> ChannelConnection
where
    K: Clone + Send + 'static,
    R: FrameSource + 'static,
    W: FrameSink + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel();
    tokio::spawn(pump_outbound(writer, rx, stop_tx));
    tokio::spawn(pump_inbound(reader, key, events, stop_rx));
    ChannelConnection::new(tx)
}

async fn pump_outbound<W: FrameSink>(
    mut sink: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    stop: oneshot::Sender<()>,
) {
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send_frame(&frame).await {
                    debug!(error = %e, "Link write failed");
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = sink.shutdown().await;
    let _ = stop.send(());
}

async fn pump_inbound<K, R: FrameSource>(
    mut source: R,
    key: K,
    events: mpsc::UnboundedSender<LinkEvent<K>>,
    mut stop: oneshot::Receiver<()>,
) where
    K: Clone,
{
    loop {
        tokio::select! {
            frame = source.recv_frame() => match frame {
                Ok(Some(frame)) => {
                    if events.send(LinkEvent::Frame(key.clone(), frame)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Link read failed");
                    break;
                }
            },
            _ = &mut stop => break,
        }
    }
    let _ = events.send(LinkEvent::Closed(key));
}

// ─── TCP ───

/// TCP server listener.
pub struct FrameListener {
    listener: TcpListener,
}

impl FrameListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((stream, addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Opens a client TCP stream.
pub async fn connect(addr: SocketAddr) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await.context("tcp connect")?;
    stream.set_nodelay(true).context("tcp nodelay")?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_connection_records_until_closed() {
        let conn = MemoryConnection::new();
        let mut handle = conn.boxed();
        handle.send("1,2").unwrap();
        handle.close();
        assert_eq!(handle.send("3"), Err(TransportError::Closed));
        assert_eq!(conn.frames(), vec!["1,2".to_string()]);
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() -> anyhow::Result<()> {
        let (a, b) = tokio::io::duplex(1024);
        let (_ra, mut wa) = framed(a);
        let (mut rb, _wb) = framed(b);

        wa.send_frame("3").await?;
        wa.send_frame("6,[[1,0.5,0.5,1.0,0.0]]").await?;
        assert_eq!(rb.recv_frame().await?.as_deref(), Some("3"));
        assert_eq!(
            rb.recv_frame().await?.as_deref(),
            Some("6,[[1,0.5,0.5,1.0,0.0]]")
        );
        Ok(())
    }

    #[tokio::test]
    async fn link_reports_frames_then_close() -> anyhow::Result<()> {
        let (local, remote) = tokio::io::duplex(1024);
        let (r, w) = framed(local);
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut conn = spawn_link(r, w, 7u32, events_tx);

        let (mut peer_r, mut peer_w) = framed(remote);
        peer_w.send_frame("{up:true}").await?;
        assert_eq!(
            events.recv().await,
            Some(LinkEvent::Frame(7, "{up:true}".to_string()))
        );

        conn.send("2,{}").map_err(anyhow::Error::new)?;
        assert_eq!(peer_r.recv_frame().await?.as_deref(), Some("2,{}"));

        conn.close();
        assert_eq!(events.recv().await, Some(LinkEvent::Closed(7)));
        assert_eq!(peer_r.recv_frame().await?, None);
        Ok(())
    }
}
