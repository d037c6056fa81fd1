//! Transfer sessions
//!
//! One session per accepted transfer, owning its side of the lock-step
//! protocol: [`WriteSession`] receives DATA and acknowledges it,
//! [`ReadSession`] sends DATA and consumes acknowledgments. Each session
//! is driven by a single task that serializes inbound datagrams, retry
//! timer ticks and external cancellation through one `select!` loop, so
//! no two events ever interleave their effects on session state.
//!
//! Sessions talk to the network through the [`Transport`] seam (a
//! connected UDP socket in production, a recording stub in tests) and to
//! storage through the [`backend`](crate::backend) traits.

mod read;
mod write;

pub use read::ReadSession;
pub use write::WriteSession;

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::protocol::Datagram;
use crate::retry::{RetryEvent, RetrySchedule, RetryTimer};

/// Default TFTP block size (RFC 1350).
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Maximum supported block size.
///
/// Keeps datagrams within a standard MTU with room for UDP/IP headers.
pub const MAX_BLOCK_SIZE: usize = 1400;

/// Minimum supported block size.
pub const MIN_BLOCK_SIZE: usize = 8;

/// Per-session tuning: block size and retransmission schedule.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Size of a full data block; a shorter block ends the transfer.
    pub block_size: usize,
    /// Waits driving retransmission and give-up.
    pub schedule: RetrySchedule,
}

impl SessionConfig {
    /// Build a config, clamping `block_size` into the supported range.
    pub fn new(block_size: usize, schedule: RetrySchedule) -> Self {
        Self {
            block_size: block_size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE),
            schedule,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            schedule: RetrySchedule::default(),
        }
    }
}

/// The session's outbound half of the wire.
///
/// Production transports encode onto a connected UDP socket; tests
/// record the datagrams instead.
pub trait Transport: Send {
    fn send(&mut self, datagram: &Datagram) -> impl Future<Output = io::Result<()>> + Send;
}

/// [`Transport`] over a connected UDP socket.
///
/// The socket is shared (via `Arc`) with the inbound pump owned by the
/// session host; the session itself only ever sends.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }
}

impl Transport for UdpTransport {
    async fn send(&mut self, datagram: &Datagram) -> io::Result<()> {
        self.socket.send(&datagram.to_wire()).await.map(|_| ())
    }
}

/// Outcome of handling one session event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Keep the event loop running.
    Continue,
    /// The transfer reached a successful terminal state.
    Finished,
}

/// What woke the session's event loop.
enum Event {
    /// A decoded datagram, or `None` when the host hung up (external
    /// cancellation).
    Inbound(Option<Datagram>),
    /// The retry timer fired.
    Timer(RetryEvent),
}

/// Await the next retry event, or forever if no timer is armed.
async fn tick_or_pending(timer: &mut Option<RetryTimer>) -> RetryEvent {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

/// Cancel and disarm the active retry timer, if any.
fn disarm(timer: &mut Option<RetryTimer>) {
    if let Some(timer) = timer.as_mut() {
        timer.cancel();
    }
    *timer = None;
}

/// Start a fresh schedule for a datagram that was just sent.
fn arm(config: &SessionConfig) -> Option<RetryTimer> {
    // The datagram itself went out synchronously; the timer only owes
    // the retransmissions and the final give-up.
    Some(RetryTimer::start(config.schedule.clone(), false))
}

#[cfg(test)]
pub(crate) mod doubles {
    //! Scripted collaborators for driving the state machines directly:
    //! a transport that records instead of sending, and in-memory
    //! readers/writers that count their calls and can be told to fail.

    use std::io;
    use std::sync::{Arc, Mutex};

    use crate::backend::{Reader, Writer};
    use crate::protocol::Datagram;

    use super::Transport;

    /// Transport that records every datagram instead of sending it.
    pub struct RecordingTransport {
        sent: Arc<Mutex<Vec<Datagram>>>,
    }

    impl RecordingTransport {
        pub fn new() -> (Self, Arc<Mutex<Vec<Datagram>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (Self { sent: sent.clone() }, sent)
        }
    }

    impl Transport for RecordingTransport {
        async fn send(&mut self, datagram: &Datagram) -> io::Result<()> {
            self.sent.lock().unwrap().push(datagram.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct WriterState {
        pub data: Vec<u8>,
        pub writes: usize,
        pub finishes: usize,
        pub cancels: usize,
    }

    /// Writer collecting into memory, with call counters.
    pub struct MockWriter {
        pub state: Arc<Mutex<WriterState>>,
        pub fail_writes: bool,
    }

    impl MockWriter {
        pub fn new() -> (Self, Arc<Mutex<WriterState>>) {
            let state = Arc::new(Mutex::new(WriterState::default()));
            (
                Self {
                    state: state.clone(),
                    fail_writes: false,
                },
                state,
            )
        }

        pub fn failing() -> (Self, Arc<Mutex<WriterState>>) {
            let (mut writer, state) = Self::new();
            writer.fail_writes = true;
            (writer, state)
        }
    }

    impl Writer for MockWriter {
        async fn write(&mut self, data: &[u8]) -> io::Result<()> {
            let mut state = self.state.lock().unwrap();
            state.writes += 1;
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::StorageFull, "I fail"));
            }
            state.data.extend_from_slice(data);
            Ok(())
        }

        async fn finish(&mut self) -> io::Result<()> {
            self.state.lock().unwrap().finishes += 1;
            Ok(())
        }

        async fn cancel(&mut self) -> io::Result<()> {
            self.state.lock().unwrap().cancels += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct ReaderState {
        pub reads: usize,
        pub finishes: usize,
    }

    /// Reader over a fixed buffer, with call counters.
    pub struct MockReader {
        data: Vec<u8>,
        pos: usize,
        fail_reads: bool,
        pub state: Arc<Mutex<ReaderState>>,
    }

    impl MockReader {
        pub fn new(data: &[u8]) -> (Self, Arc<Mutex<ReaderState>>) {
            let state = Arc::new(Mutex::new(ReaderState::default()));
            (
                Self {
                    data: data.to_vec(),
                    pos: 0,
                    fail_reads: false,
                    state: state.clone(),
                },
                state,
            )
        }

        pub fn failing() -> (Self, Arc<Mutex<ReaderState>>) {
            let (mut reader, state) = Self::new(b"");
            reader.fail_reads = true;
            (reader, state)
        }
    }

    impl Reader for MockReader {
        async fn read(&mut self, size: usize) -> io::Result<Vec<u8>> {
            self.state.lock().unwrap().reads += 1;
            if self.fail_reads {
                return Err(io::Error::other("A failure"));
            }
            let end = (self.pos + size).min(self.data.len());
            let chunk = self.data[self.pos..end].to_vec();
            self.pos = end;
            Ok(chunk)
        }

        async fn finish(&mut self) -> io::Result<()> {
            self.state.lock().unwrap().finishes += 1;
            Ok(())
        }
    }
}
