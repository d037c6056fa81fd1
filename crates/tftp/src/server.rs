//! TFTP Server
//!
//! The request dispatcher and per-transfer session host. The server
//! socket only ever sees initial RRQ/WRQ datagrams; every accepted
//! request gets its own ephemeral socket connected to the peer (RFC 1350
//! transfer IDs) and a dedicated task running the session.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::backend::{FilesystemBackend, Reader, Writer};
use crate::netascii::{NetasciiReader, NetasciiWriter};
use crate::protocol::{Datagram, TftpErrorCode, TransferMode};
use crate::session::{ReadSession, SessionConfig, UdpTransport, WriteSession};

/// TFTP Server configuration
#[derive(Debug, Clone)]
pub struct TftpServerConfig {
    /// Address the request socket binds to.
    pub bind_address: String,
    /// Directory transfers are confined to.
    pub root_directory: PathBuf,
    /// Block size and retry schedule applied to every session.
    pub session: SessionConfig,
}

impl Default for TftpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:6969".to_string(),
            root_directory: PathBuf::from("./tftp_root"),
            session: SessionConfig::default(),
        }
    }
}

/// Main TFTP server
pub struct TftpServer {
    config: TftpServerConfig,
    backend: FilesystemBackend,
    socket: Option<Arc<UdpSocket>>,
}

impl TftpServer {
    /// Create a new TFTP server with the given configuration
    pub fn new(config: TftpServerConfig) -> Self {
        let backend = FilesystemBackend::new(config.root_directory.clone());
        Self {
            config,
            backend,
            socket: None,
        }
    }

    /// Create a new TFTP server with default configuration
    pub fn with_defaults() -> Self {
        Self::new(TftpServerConfig::default())
    }

    /// Get the server's configuration
    pub fn config(&self) -> &TftpServerConfig {
        &self.config
    }

    /// Bind the request socket.
    pub async fn bind(&mut self) -> Result<()> {
        let socket = UdpSocket::bind(&self.config.bind_address)
            .await
            .context("Failed to bind TFTP server socket")?;

        let local_addr = socket.local_addr().context("Failed to get local address")?;
        tracing::info!(
            "TFTP server listening on {}, serving files from {}",
            local_addr,
            self.config.root_directory.display()
        );

        self.socket = Some(Arc::new(socket));
        Ok(())
    }

    /// Get the local address the server is bound to (if running)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind and run the main loop.
    pub async fn run(&mut self) -> Result<()> {
        self.bind().await?;
        self.serve().await
    }

    /// Main server loop
    pub async fn serve(&self) -> Result<()> {
        let socket = self.socket.as_ref().expect("Server must be bound before serving");

        let mut buffer = [0u8; 2048];

        loop {
            let (len, client_addr) = socket.recv_from(&mut buffer).await?;
            tracing::debug!("Received packet from {}", client_addr);

            match Datagram::from_wire(&buffer[..len]) {
                Ok(Datagram::ReadRequest {
                    filename,
                    mode,
                    options,
                }) => {
                    tracing::info!(
                        "RRQ for '{}' in {} mode from {} (options: {:?})",
                        filename,
                        mode,
                        client_addr,
                        options
                    );
                    self.spawn_read_session(client_addr, filename, mode);
                }
                Ok(Datagram::WriteRequest {
                    filename,
                    mode,
                    options,
                }) => {
                    tracing::info!(
                        "WRQ for '{}' in {} mode from {} (options: {:?})",
                        filename,
                        mode,
                        client_addr,
                        options
                    );
                    self.spawn_write_session(client_addr, filename, mode);
                }
                Ok(Datagram::Error { code, message }) => {
                    tracing::debug!("Stray ERROR from {}: {}: {}", client_addr, code, message);
                }
                Ok(other) => {
                    // DATA/ACK on the request port belongs to no transfer.
                    tracing::debug!("Stray {} from {}", other.opcode(), client_addr);
                    let reply = Datagram::error_from_code(TftpErrorCode::UnknownTransferId);
                    let _ = socket.send_to(&reply.to_wire(), client_addr).await;
                }
                Err(e) => {
                    tracing::warn!("Malformed datagram from {}: {}", client_addr, e);
                    let reply = Datagram::Error {
                        code: TftpErrorCode::IllegalOperation,
                        message: e.to_string(),
                    };
                    let _ = socket.send_to(&reply.to_wire(), client_addr).await;
                }
            }
        }
    }

    fn spawn_read_session(&self, client: SocketAddr, filename: String, mode: TransferMode) {
        let backend = self.backend.clone();
        let config = self.config.session.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_read_request(backend, config, client, &filename, mode).await {
                tracing::warn!("Failed to transfer '{}' to {}: {:#}", filename, client, e);
            }
        });
    }

    fn spawn_write_session(&self, client: SocketAddr, filename: String, mode: TransferMode) {
        let backend = self.backend.clone();
        let config = self.config.session.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_write_request(backend, config, client, &filename, mode).await {
                tracing::warn!("Failed to receive '{}' from {}: {:#}", filename, client, e);
            }
        });
    }
}

/// Handle one accepted RRQ for its whole lifetime.
async fn handle_read_request(
    backend: FilesystemBackend,
    config: SessionConfig,
    client: SocketAddr,
    filename: &str,
    mode: TransferMode,
) -> Result<()> {
    let reader = match backend.reader_for(filename).await {
        Ok(reader) => reader,
        Err(e) => {
            send_error_reply(client, &e).await?;
            return Err(e).context(format!("cannot open '{}'", filename));
        }
    };

    match mode {
        TransferMode::Octet => run_read_session(reader, config, client).await,
        TransferMode::NetAscii => run_read_session(NetasciiReader::new(reader), config, client).await,
    }
}

/// Handle one accepted WRQ for its whole lifetime.
async fn handle_write_request(
    backend: FilesystemBackend,
    config: SessionConfig,
    client: SocketAddr,
    filename: &str,
    mode: TransferMode,
) -> Result<()> {
    let writer = match backend.writer_for(filename).await {
        Ok(writer) => writer,
        Err(e) => {
            send_error_reply(client, &e).await?;
            return Err(e).context(format!("cannot create '{}'", filename));
        }
    };

    match mode {
        TransferMode::Octet => run_write_session(writer, config, client).await,
        TransferMode::NetAscii => run_write_session(NetasciiWriter::new(writer), config, client).await,
    }
}

/// Host a read session: fresh socket, datagram pump, session task.
async fn run_read_session<R>(reader: R, config: SessionConfig, client: SocketAddr) -> Result<()>
where
    R: Reader,
{
    let socket = create_session_socket(client).await?;
    let session = ReadSession::new(reader, UdpTransport::new(socket.clone()), config);

    let (tx, rx) = mpsc::channel(16);
    let pump = tokio::spawn(pump_datagrams(socket, tx));
    let result = session.run(rx).await;
    pump.abort();

    result
}

/// Host a write session: fresh socket, datagram pump, session task.
async fn run_write_session<W>(writer: W, config: SessionConfig, client: SocketAddr) -> Result<()>
where
    W: Writer,
{
    let socket = create_session_socket(client).await?;
    let session = WriteSession::new(writer, UdpTransport::new(socket.clone()), config);

    let (tx, rx) = mpsc::channel(16);
    let pump = tokio::spawn(pump_datagrams(socket, tx));
    let result = session.run(rx).await;
    pump.abort();

    result
}

/// Forward decoded datagrams from the session socket into the session.
///
/// Malformed datagrams are answered with `ERROR(IllegalOperation)` right
/// here; the session state machine never sees them.
async fn pump_datagrams(socket: Arc<UdpSocket>, tx: mpsc::Sender<Datagram>) {
    let mut buf = [0u8; 2048];

    loop {
        let len = match socket.recv(&mut buf).await {
            Ok(len) => len,
            Err(e) => {
                tracing::debug!("session socket closed: {}", e);
                return;
            }
        };

        match Datagram::from_wire(&buf[..len]) {
            Ok(dgram) => {
                tracing::trace!("Datagram received: {}", dgram);
                if tx.send(dgram).await.is_err() {
                    // Session is gone; nothing left to deliver to.
                    return;
                }
            }
            Err(e) => {
                tracing::debug!("Malformed datagram in session: {}", e);
                let reply = Datagram::Error {
                    code: TftpErrorCode::IllegalOperation,
                    message: e.to_string(),
                };
                let _ = socket.send(&reply.to_wire()).await;
            }
        }
    }
}

/// Create an ephemeral UDP socket connected to the client.
///
/// The family (and wildcard address) follows the client address, so v4
/// and v6 peers both get a matching transfer socket.
async fn create_session_socket(client: SocketAddr) -> Result<Arc<UdpSocket>> {
    let bind_addr = match client {
        SocketAddr::V4(_) => "0.0.0.0:0",
        SocketAddr::V6(_) => "[::]:0",
    };

    let socket = UdpSocket::bind(bind_addr)
        .await
        .context("failed to bind session socket")?;
    socket
        .connect(client)
        .await
        .context("failed to connect session socket")?;

    tracing::debug!("Transfer socket bound to {:?}", socket.local_addr().ok());
    Ok(Arc::new(socket))
}

/// Answer a request that never became a session with an ERROR datagram,
/// from an ephemeral socket of its own.
async fn send_error_reply(client: SocketAddr, error: &io::Error) -> Result<()> {
    let code = match error.kind() {
        io::ErrorKind::NotFound => TftpErrorCode::FileNotFound,
        io::ErrorKind::PermissionDenied => TftpErrorCode::AccessViolation,
        io::ErrorKind::AlreadyExists => TftpErrorCode::FileAlreadyExists,
        _ => TftpErrorCode::NotDefined,
    };

    let socket = create_session_socket(client).await?;
    let reply = Datagram::Error {
        code,
        message: error.to_string(),
    };
    socket.send(&reply.to_wire()).await.context("failed to send ERROR")?;
    Ok(())
}

/// Run a TFTP server with the given bind address and root directory
///
/// This is a convenience function that creates and runs a TFTP server.
pub async fn run_tftp_server(bind_address: String, root_directory: PathBuf) -> Result<()> {
    let config = TftpServerConfig {
        bind_address,
        root_directory,
        session: SessionConfig::default(),
    };
    TftpServer::new(config).run().await
}
