//! Integration tests for the TFTP engine
//!
//! These tests start the actual server and run whole transfers against
//! it with real network sockets.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tempfile::tempdir;
use tftp::{Datagram, SessionConfig, TftpErrorCode, TftpServer, TftpServerConfig, TransferMode};
use tokio::fs;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Bind a server on an ephemeral port and start serving.
async fn start_server(root: &Path) -> (SocketAddr, JoinHandle<anyhow::Result<()>>) {
    let config = TftpServerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        root_directory: root.to_path_buf(),
        session: SessionConfig::default(),
    };

    let mut server = TftpServer::new(config);
    server.bind().await.unwrap();
    let addr = server.local_addr().unwrap();

    let handle = tokio::spawn(async move { server.serve().await });
    (addr, handle)
}

async fn client_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

fn rrq(filename: &str, mode: TransferMode) -> Datagram {
    Datagram::ReadRequest {
        filename: filename.to_string(),
        mode,
        options: vec![],
    }
}

fn wrq(filename: &str, mode: TransferMode) -> Datagram {
    Datagram::WriteRequest {
        filename: filename.to_string(),
        mode,
        options: vec![],
    }
}

/// Receive and decode one datagram, remembering who sent it (the
/// session answers from its own ephemeral port, not the request port).
async fn recv_datagram(socket: &UdpSocket) -> (Datagram, SocketAddr) {
    let mut buf = [0u8; 2048];
    let (len, from) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for a datagram")
        .unwrap();
    (Datagram::from_wire(&buf[..len]).unwrap(), from)
}

#[tokio::test]
async fn test_short_file_download() {
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("file.txt"), b"0123456789")
        .await
        .unwrap();
    let (server_addr, server) = start_server(temp_dir.path()).await;

    let client = client_socket().await;
    client
        .send_to(&rrq("file.txt", TransferMode::Octet).to_wire(), server_addr)
        .await
        .unwrap();

    // A 10-byte file fits in one short block.
    let (dgram, session_addr) = recv_datagram(&client).await;
    assert_eq!(
        dgram,
        Datagram::Data {
            block: 1,
            payload: b"0123456789".to_vec(),
        }
    );
    assert_ne!(session_addr, server_addr, "transfers must use a fresh TID");

    client
        .send_to(&Datagram::Ack { block: 1 }.to_wire(), session_addr)
        .await
        .unwrap();

    // The session is done; nothing further arrives, not even a
    // retransmission once the first retry wait has passed.
    let mut buf = [0u8; 2048];
    let extra = timeout(Duration::from_millis(1500), client.recv_from(&mut buf)).await;
    assert!(extra.is_err(), "no datagrams expected after the final ACK");

    server.abort();
}

#[tokio::test]
async fn test_multi_block_download() {
    let content: Vec<u8> = (0..1036u32).map(|i| (i % 251) as u8).collect();
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("boot.img"), &content).await.unwrap();
    let (server_addr, server) = start_server(temp_dir.path()).await;

    let client = client_socket().await;
    client
        .send_to(&rrq("boot.img", TransferMode::Octet).to_wire(), server_addr)
        .await
        .unwrap();

    let mut received = Vec::new();
    let mut expected_block = 1u16;
    loop {
        let (dgram, session_addr) = recv_datagram(&client).await;
        let Datagram::Data { block, payload } = dgram else {
            panic!("expected DATA, got {:?}", dgram);
        };
        assert_eq!(block, expected_block);
        received.extend_from_slice(&payload);

        client
            .send_to(&Datagram::Ack { block }.to_wire(), session_addr)
            .await
            .unwrap();

        if payload.len() < 512 {
            break;
        }
        expected_block += 1;
    }

    assert_eq!(expected_block, 3); // 512 + 512 + 12 bytes
    assert_eq!(received, content);

    server.abort();
}

#[tokio::test]
async fn test_upload_with_duplicate_blocks() {
    let temp_dir = tempdir().unwrap();
    let (server_addr, server) = start_server(temp_dir.path()).await;

    let client = client_socket().await;
    client
        .send_to(&wrq("upload.bin", TransferMode::Octet).to_wire(), server_addr)
        .await
        .unwrap();

    // The request is acknowledged as block 0 from the session port.
    let (dgram, session_addr) = recv_datagram(&client).await;
    assert_eq!(dgram, Datagram::Ack { block: 0 });

    let block1 = vec![0xabu8; 512];
    let block2 = vec![0xcdu8; 100];

    // Block 1, then the same datagram again as the network would
    // duplicate it: both get ACK(1).
    for _ in 0..2 {
        client
            .send_to(
                &Datagram::Data {
                    block: 1,
                    payload: block1.clone(),
                }
                .to_wire(),
                session_addr,
            )
            .await
            .unwrap();
        let (dgram, _) = recv_datagram(&client).await;
        assert_eq!(dgram, Datagram::Ack { block: 1 });
    }

    // The short final block, duplicated as well: both get ACK(2).
    for _ in 0..2 {
        client
            .send_to(
                &Datagram::Data {
                    block: 2,
                    payload: block2.clone(),
                }
                .to_wire(),
                session_addr,
            )
            .await
            .unwrap();
        let (dgram, _) = recv_datagram(&client).await;
        assert_eq!(dgram, Datagram::Ack { block: 2 });
    }

    // Exactly one copy of each block was written and committed.
    let mut expected = block1;
    expected.extend_from_slice(&block2);
    assert_eq!(
        fs::read(temp_dir.path().join("upload.bin")).await.unwrap(),
        expected
    );

    server.abort();
}

#[tokio::test]
async fn test_download_missing_file() {
    let temp_dir = tempdir().unwrap();
    let (server_addr, server) = start_server(temp_dir.path()).await;

    let client = client_socket().await;
    client
        .send_to(&rrq("missing.txt", TransferMode::Octet).to_wire(), server_addr)
        .await
        .unwrap();

    let (dgram, _) = recv_datagram(&client).await;
    let Datagram::Error { code, .. } = dgram else {
        panic!("expected ERROR, got {:?}", dgram);
    };
    assert_eq!(code, TftpErrorCode::FileNotFound);

    server.abort();
}

#[tokio::test]
async fn test_upload_refuses_existing_file() {
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("taken.bin"), b"x").await.unwrap();
    let (server_addr, server) = start_server(temp_dir.path()).await;

    let client = client_socket().await;
    client
        .send_to(&wrq("taken.bin", TransferMode::Octet).to_wire(), server_addr)
        .await
        .unwrap();

    let (dgram, _) = recv_datagram(&client).await;
    let Datagram::Error { code, .. } = dgram else {
        panic!("expected ERROR, got {:?}", dgram);
    };
    assert_eq!(code, TftpErrorCode::FileAlreadyExists);

    server.abort();
}

#[tokio::test]
async fn test_netascii_download_expands_line_endings() {
    let temp_dir = tempdir().unwrap();
    fs::write(temp_dir.path().join("notes.txt"), b"a\nb\n").await.unwrap();
    let (server_addr, server) = start_server(temp_dir.path()).await;

    let client = client_socket().await;
    client
        .send_to(&rrq("notes.txt", TransferMode::NetAscii).to_wire(), server_addr)
        .await
        .unwrap();

    let (dgram, session_addr) = recv_datagram(&client).await;
    assert_eq!(
        dgram,
        Datagram::Data {
            block: 1,
            payload: b"a\r\nb\r\n".to_vec(),
        }
    );

    client
        .send_to(&Datagram::Ack { block: 1 }.to_wire(), session_addr)
        .await
        .unwrap();

    server.abort();
}

#[tokio::test]
async fn test_malformed_request_gets_illegal_operation() {
    let temp_dir = tempdir().unwrap();
    let (server_addr, server) = start_server(temp_dir.path()).await;

    let client = client_socket().await;
    // RRQ with an unterminated filename.
    client.send_to(&[0u8, 1, b'x', b'y'], server_addr).await.unwrap();

    let (dgram, _) = recv_datagram(&client).await;
    let Datagram::Error { code, .. } = dgram else {
        panic!("expected ERROR, got {:?}", dgram);
    };
    assert_eq!(code, TftpErrorCode::IllegalOperation);

    server.abort();
}

#[tokio::test]
async fn test_stray_ack_gets_unknown_tid() {
    let temp_dir = tempdir().unwrap();
    let (server_addr, server) = start_server(temp_dir.path()).await;

    let client = client_socket().await;
    client
        .send_to(&Datagram::Ack { block: 3 }.to_wire(), server_addr)
        .await
        .unwrap();

    let (dgram, _) = recv_datagram(&client).await;
    let Datagram::Error { code, .. } = dgram else {
        panic!("expected ERROR, got {:?}", dgram);
    };
    assert_eq!(code, TftpErrorCode::UnknownTransferId);

    server.abort();
}
