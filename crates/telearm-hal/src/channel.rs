//! [`CommandChannel`] – the one TCP socket to the robot controller.
//!
//! The socket is split into its read and write halves, each behind its own
//! async mutex:
//!
//! * the **write lock** covers an entire NUL-terminated command, so two
//!   concurrent senders never interleave bytes on the wire;
//! * the **read lock** lets the status monitor wait for a reply without
//!   holding up command traffic.
//!
//! Every socket operation is bounded by the channel's I/O timeout.

use std::time::Duration;

use telearm_types::ArmError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Default bound on connect, read and write operations.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(100);

/// Size of a single status read.
pub const RECEIVE_BUFFER_BYTES: usize = 1024;

/// Outcome of a successful [`CommandChannel::receive_raw`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// `n` bytes were written into the caller's buffer.
    Data(usize),
    /// Nothing arrived within the I/O timeout. Not an error.
    TimedOut,
}

/// Owner of the controller socket.
///
/// Lock order: writer before reader. Only [`connect`][Self::connect] takes
/// both.
pub struct CommandChannel {
    address: String,
    io_timeout: Duration,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<OwnedReadHalf>>,
}

impl CommandChannel {
    /// Create a closed channel targeting `address` (`host:port`).
    pub fn new(address: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            io_timeout,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// The controller address this channel dials.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// `true` while a socket is held.
    pub async fn is_open(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Open the TCP connection.
    ///
    /// Idempotent: returns `Ok(())` without reopening when a socket is
    /// already held.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Connection`] when the controller refuses the
    /// connection or does not answer within the I/O timeout.
    pub async fn connect(&self) -> Result<(), ArmError> {
        let mut writer = self.writer.lock().await;
        if writer.is_some() {
            return Ok(());
        }

        let stream = match timeout(self.io_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ArmError::Connection(format!(
                    "connect to {} failed: {e}",
                    self.address
                )));
            }
            Err(_) => {
                return Err(ArmError::Connection(format!(
                    "connect to {} timed out after {:?}",
                    self.address, self.io_timeout
                )));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle on controller socket");
        }

        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(read_half);
        *writer = Some(write_half);
        debug!(address = %self.address, "controller socket open");
        Ok(())
    }

    /// Write `command` followed by a NUL terminator.
    ///
    /// The write lock is held for the whole frame. A write that times out
    /// may leave a partial command on the wire; callers treat any error as
    /// fatal for the link.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Send`] when the channel is closed, the write
    /// fails, or the write does not complete within the I/O timeout.
    pub async fn send_command(&self, command: &str) -> Result<(), ArmError> {
        let mut frame = Vec::with_capacity(command.len() + 1);
        frame.extend_from_slice(command.as_bytes());
        frame.push(0);

        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(ArmError::Send(format!(
                "cannot send '{command}': channel is not connected"
            )));
        };
        match timeout(self.io_timeout, stream.write_all(&frame)).await {
            Ok(Ok(())) => {
                trace!(command, "command sent");
                Ok(())
            }
            Ok(Err(e)) => Err(ArmError::Send(format!("write of '{command}' failed: {e}"))),
            Err(_) => Err(ArmError::Send(format!(
                "write of '{command}' timed out after {:?}",
                self.io_timeout
            ))),
        }
    }

    /// Read whatever the controller has sent, up to `buf.len()` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Receive`] when the channel is closed, the peer
    /// closed the connection, or the read fails. A quiet controller is
    /// reported as [`Received::TimedOut`], not as an error.
    pub async fn receive_raw(&self, buf: &mut [u8]) -> Result<Received, ArmError> {
        let mut reader = self.reader.lock().await;
        let Some(stream) = reader.as_mut() else {
            return Err(ArmError::Receive("channel is not connected".to_string()));
        };
        match timeout(self.io_timeout, stream.read(buf)).await {
            Err(_) => Ok(Received::TimedOut),
            Ok(Ok(0)) if !buf.is_empty() => Err(ArmError::Receive(
                "controller closed the connection".to_string(),
            )),
            Ok(Ok(n)) => Ok(Received::Data(n)),
            Ok(Err(e)) => Err(ArmError::Receive(e.to_string())),
        }
    }

    /// Release the socket. Safe to call repeatedly.
    pub async fn close(&self) {
        let write_half = self.writer.lock().await.take();
        let read_half = self.reader.lock().await.take();
        if write_half.is_some() || read_half.is_some() {
            debug!(address = %self.address, "controller socket closed");
        }
    }

    /// Best-effort synchronous close for teardown paths that cannot await.
    ///
    /// Halves whose lock is currently held are left to be dropped with the
    /// channel.
    pub fn close_now(&self) {
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn send_appends_nul_terminator() {
        let (listener, addr) = listener().await;
        let channel = CommandChannel::new(addr, DEFAULT_IO_TIMEOUT);
        channel.connect().await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        channel.send_command("Home").await.unwrap();
        channel.close().await;

        let mut wire = Vec::new();
        peer.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire, b"Home\0");
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (listener, addr) = listener().await;
        let channel = CommandChannel::new(addr, DEFAULT_IO_TIMEOUT);
        channel.connect().await.unwrap();
        let _peer = listener.accept().await.unwrap();

        channel.connect().await.unwrap();
        assert!(channel.is_open().await);
        let second = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(second.is_err(), "second connect must not open a new socket");
    }

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        let (listener, addr) = listener().await;
        drop(listener);

        let channel = CommandChannel::new(addr, DEFAULT_IO_TIMEOUT);
        let result = channel.connect().await;
        assert!(
            matches!(result, Err(ArmError::Connection(_))),
            "expected Connection error, got {result:?}"
        );
        assert!(!channel.is_open().await);
    }

    #[tokio::test]
    async fn send_on_closed_channel_is_a_send_error() {
        let channel = CommandChannel::new("127.0.0.1:9", DEFAULT_IO_TIMEOUT);
        let result = channel.send_command("Home").await;
        assert!(matches!(result, Err(ArmError::Send(_))));
    }

    #[tokio::test]
    async fn silent_peer_times_out_and_closed_peer_errors() {
        let (listener, addr) = listener().await;
        let channel = CommandChannel::new(addr, Duration::from_millis(50));
        channel.connect().await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();

        let mut buf = [0u8; RECEIVE_BUFFER_BYTES];
        assert_eq!(channel.receive_raw(&mut buf).await, Ok(Received::TimedOut));

        drop(peer);
        let result = channel.receive_raw(&mut buf).await;
        assert!(
            matches!(result, Err(ArmError::Receive(_))),
            "expected Receive error after peer close, got {result:?}"
        );
    }

    #[tokio::test]
    async fn receive_returns_peer_bytes() {
        let (listener, addr) = listener().await;
        let channel = CommandChannel::new(addr, DEFAULT_IO_TIMEOUT);
        channel.connect().await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        peer.write_all(b"[2007][1,1,0,0,0,0,0]\0").await.unwrap();
        let mut buf = [0u8; RECEIVE_BUFFER_BYTES];
        let Ok(Received::Data(n)) = channel.receive_raw(&mut buf).await else {
            panic!("expected data");
        };
        assert_eq!(&buf[..n], b"[2007][1,1,0,0,0,0,0]\0");
    }

    #[tokio::test]
    async fn close_is_repeatable() {
        let (listener, addr) = listener().await;
        let channel = CommandChannel::new(addr, DEFAULT_IO_TIMEOUT);
        channel.connect().await.unwrap();
        let _peer = listener.accept().await.unwrap();

        channel.close().await;
        channel.close().await;
        channel.close_now();
        assert!(!channel.is_open().await);
    }

    /// Many tasks sending at once must never tear a command: every frame on
    /// the wire is one whole command, and each task's commands arrive in the
    /// order that task issued them.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_never_interleave() {
        const TASKS: usize = 8;
        const PER_TASK: usize = 50;

        let (listener, addr) = listener().await;
        let channel = Arc::new(CommandChannel::new(addr, Duration::from_secs(2)));
        channel.connect().await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        let reader = tokio::spawn(async move {
            let mut wire = Vec::new();
            peer.read_to_end(&mut wire).await.unwrap();
            wire
        });

        let mut senders = Vec::new();
        for task in 0..TASKS {
            let channel = Arc::clone(&channel);
            senders.push(tokio::spawn(async move {
                for i in 0..PER_TASK {
                    let cmd = format!("MoveLinVelWrf({task}.0, {i}.0, 0.0, 0, 0, 0)");
                    channel.send_command(&cmd).await.unwrap();
                }
            }));
        }
        for sender in senders {
            sender.await.unwrap();
        }
        channel.close().await;

        let wire = reader.await.unwrap();
        let frames: Vec<&[u8]> = wire
            .split(|b| *b == 0)
            .filter(|f| !f.is_empty())
            .collect();
        assert_eq!(frames.len(), TASKS * PER_TASK);

        let mut next_index: HashMap<usize, usize> = HashMap::new();
        for frame in frames {
            let text = std::str::from_utf8(frame).unwrap();
            let args = text
                .strip_prefix("MoveLinVelWrf(")
                .and_then(|s| s.strip_suffix(", 0.0, 0, 0, 0)"))
                .unwrap_or_else(|| panic!("torn frame: {text:?}"));
            let (task, i) = args.split_once(", ").unwrap();
            let task: usize = task.trim_end_matches(".0").parse().unwrap();
            let i: usize = i.trim_end_matches(".0").parse().unwrap();
            let expected = next_index.entry(task).or_insert(0);
            assert_eq!(i, *expected, "task {task} commands out of order");
            *expected += 1;
        }
    }
}
