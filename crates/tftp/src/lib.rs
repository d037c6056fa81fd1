//! TFTP transfer-session engine
//!
//! An RFC 1350 TFTP implementation built for bare-metal provisioning:
//! the part of a netboot stack that actually moves kernels, initrds and
//! installer images to machines with nothing but firmware on them.
//!
//! The heart of the crate is the pair of per-transfer state machines in
//! [`session`]: [`WriteSession`] receives uploads and [`ReadSession`]
//! serves downloads, turning UDP's unreliable, unordered delivery into
//! a reliable byte stream using RFC 1350's lock-step protocol with a
//! one-packet window, schedule-driven retransmission ([`retry`]), and
//! duplicate and out-of-order detection.
//!
//! Around them:
//! - [`protocol`]: the pure datagram codec and protocol enums
//! - [`backend`]: the [`Reader`]/[`Writer`] storage seam and a
//!   root-confined filesystem backend
//! - [`netascii`]: streaming line-ending conversion for text transfers
//! - [`server`]: the request dispatcher binding it all to sockets

pub mod backend;
pub mod netascii;
pub mod protocol;
pub mod retry;
pub mod server;
pub mod session;

pub use backend::{FileReader, FileWriter, FilesystemBackend, Reader, Writer};
pub use netascii::{NetasciiReader, NetasciiWriter};
pub use protocol::{
    Datagram, DecodeError, TftpErrorCode, TftpOpcode, TransferMode, convert_from_netascii,
    convert_to_netascii,
};
pub use retry::{RetryEvent, RetrySchedule, RetryTimer};
pub use server::{TftpServer, TftpServerConfig, run_tftp_server};
pub use session::{
    DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, ReadSession, SessionConfig, Transport,
    UdpTransport, WriteSession,
};
