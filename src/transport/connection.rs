//! One TCP connection to one job server.
//!
//! A [`Connection`] owns the socket, a [`Codec`] buffering partial reads, and
//! the FIFO of submissions still waiting for `job_created`. The server answers
//! submissions on one socket in order, so the head of the FIFO is always the
//! task a `job_created` belongs to.
//!
//! # Example
//!
//! ```ignore
//! use gearman_client::transport::{Connection, ServerAddr};
//!
//! let addr: ServerAddr = "localhost".parse()?;
//! let mut conn = Connection::connect(&addr, Duration::from_secs(2), table).await?;
//! conn.send("echo_req", &[("text", b"ping")]).await?;
//! let packet = conn.read_blocking(Duration::from_millis(500)).await?;
//! assert_eq!(packet.name(), "echo_res");
//! ```

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use futures::FutureExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

use super::server::ServerAddr;
use crate::error::{GearmanError, Result};
use crate::protocol::{Codec, CommandTable, Packet};

/// Delay between two connect attempts within one connect timeout.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Size of the scratch buffer for socket reads.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// A connection to a single job server.
pub struct Connection {
    addr: ServerAddr,
    stream: Option<TcpStream>,
    codec: Codec,
    waiting: VecDeque<usize>,
    read_buf: Vec<u8>,
}

impl Connection {
    /// Connect to `addr`, retrying until `connect_timeout` elapses.
    pub async fn connect(
        addr: &ServerAddr,
        connect_timeout: Duration,
        table: Arc<CommandTable>,
    ) -> Result<Self> {
        let deadline = Instant::now() + connect_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let reason = match timeout(remaining, TcpStream::connect((addr.host(), addr.port()))).await
            {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    tracing::info!(server = %addr, "connected");
                    return Ok(Self {
                        addr: addr.clone(),
                        stream: Some(stream),
                        codec: Codec::new(table),
                        waiting: VecDeque::new(),
                        read_buf: vec![0u8; READ_CHUNK_SIZE],
                    });
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "connect timed out".to_string(),
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::debug!(server = %addr, %reason, "connect failed");
                return Err(GearmanError::CouldNotConnect {
                    addr: addr.to_string(),
                    reason,
                });
            }
            sleep(CONNECT_RETRY_DELAY.min(remaining)).await;
        }
    }

    /// Server this connection talks to.
    pub fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    /// Liveness predicate.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Encode and write one command, flushing the whole frame.
    pub async fn send(&mut self, command: &str, fields: &[(&str, &[u8])]) -> Result<()> {
        let frame = self.codec.encode(command, fields)?;
        let stream = self.stream.as_mut().ok_or(GearmanError::ConnectionReset)?;

        if let Err(e) = stream.write_all(&frame).await {
            self.close();
            return Err(GearmanError::WriteFailed(e));
        }

        tracing::debug!(server = %self.addr, command, bytes = frame.len(), "sent");
        Ok(())
    }

    /// Return a packet if one can be decoded right now, without waiting.
    ///
    /// `Ok(None)` means nothing to process yet. End of stream fails with
    /// `ConnectionReset`; framing errors close the connection.
    pub fn read_nonblocking(&mut self) -> Result<Option<Packet>> {
        if let Some(packet) = self.decode_buffered()? {
            return Ok(Some(packet));
        }

        let Some(stream) = self.stream.as_ref() else {
            return Err(GearmanError::ConnectionReset);
        };

        loop {
            match stream.try_read(&mut self.read_buf) {
                Ok(0) => {
                    tracing::debug!(server = %self.addr, buffered = self.codec.len(), "peer closed");
                    self.close();
                    return Err(GearmanError::ConnectionReset);
                }
                Ok(n) => {
                    self.codec.push(&self.read_buf[..n]);
                    if n < self.read_buf.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close();
                    return Err(GearmanError::Io(e));
                }
            }
        }

        self.decode_buffered()
    }

    /// Wait until a full packet is available or `read_timeout` elapses.
    pub async fn read_blocking(&mut self, read_timeout: Duration) -> Result<Packet> {
        let deadline = Instant::now() + read_timeout;

        loop {
            if let Some(packet) = self.read_nonblocking()? {
                return Ok(packet);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(GearmanError::ReadTimeout);
            }
            match timeout(remaining, self.readable()).await {
                Ok(ready) => ready?,
                Err(_) => return Err(GearmanError::ReadTimeout),
            }
        }
    }

    /// Resolve once the socket is readable or a packet is already buffered.
    pub async fn readable(&self) -> Result<()> {
        if self.codec.has_complete_packet() {
            return Ok(());
        }
        match &self.stream {
            Some(stream) => Ok(stream.readable().await?),
            None => Err(GearmanError::ConnectionReset),
        }
    }

    /// Close the socket. Safe to call more than once.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!(server = %self.addr, "closed");
        }
        self.codec.clear();
    }

    /// Queue a submitted task (by set position) awaiting `job_created`.
    pub fn push_waiting(&mut self, position: usize) {
        self.waiting.push_back(position);
    }

    /// Take the oldest submission awaiting `job_created`.
    pub fn pop_waiting(&mut self) -> Option<usize> {
        self.waiting.pop_front()
    }

    /// Number of submissions still awaiting `job_created`.
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    fn decode_buffered(&mut self) -> Result<Option<Packet>> {
        match self.codec.decode() {
            Ok(packet) => {
                if let Some(p) = &packet {
                    tracing::debug!(server = %self.addr, command = p.name(), "received");
                }
                Ok(packet)
            }
            Err(e) => {
                if e.is_protocol() {
                    tracing::error!(server = %self.addr, error = %e, "framing error, closing");
                    self.close();
                }
                Err(e)
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Wait until any connection is readable, or `wait` elapses.
///
/// Returns the indices of the connections that are ready; empty on timeout.
/// A closed connection counts as ready so that the next read surfaces its
/// error.
pub async fn wait_any_readable(conns: &[Connection], wait: Duration) -> Vec<usize> {
    if conns.is_empty() {
        return Vec::new();
    }

    let buffered: Vec<usize> = conns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.codec.has_complete_packet())
        .map(|(i, _)| i)
        .collect();
    if !buffered.is_empty() {
        return buffered;
    }

    let futures = conns.iter().map(|c| Box::pin(c.readable()));
    let Ok((_, first, _)) = timeout(wait, select_all(futures)).await else {
        return Vec::new();
    };

    let mut ready = vec![first];
    for (i, conn) in conns.iter().enumerate() {
        if i != first && conn.readable().now_or_never().is_some() {
            ready.push(i);
        }
    }
    ready
}
