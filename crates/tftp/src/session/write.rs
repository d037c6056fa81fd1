//! Write session: the receiving half of a transfer.
//!
//! Drives a WRQ-initiated exchange: acknowledge the request as block 0,
//! then accept DATA blocks in lock step, feeding each one to the backend
//! [`Writer`] and answering with an ACK that is retransmitted until the
//! next block (or the retry schedule's give-up) arrives.
//!
//! After the final short block the session does not terminate
//! immediately: it lingers for one more schedule so a retransmitted
//! final DATA (whose ACK was lost) still gets answered.

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;

use crate::backend::Writer;
use crate::protocol::{Datagram, TftpErrorCode};
use crate::retry::RetryEvent;
use crate::session::{Event, SessionConfig, Transport, arm, disarm, tick_or_pending};

/// State machine receiving a transfer.
///
/// Constructed by the dispatcher once a WRQ has been accepted and a
/// [`Writer`] resolved; consumed by [`run`](Self::run), which returns
/// when the transfer reaches a terminal state. The writer is released
/// exactly once on every path: committed via `finish` when the final
/// block arrives, discarded via `cancel` otherwise.
pub struct WriteSession<W, T> {
    writer: W,
    transport: T,
    config: SessionConfig,
    /// Last block number accepted and acknowledged.
    blocknum: u16,
    /// The final short block has been accepted and committed.
    completed: bool,
    timer: Option<crate::retry::RetryTimer>,
    /// Datagram to re-send when the timer asks for a retransmission.
    in_flight: Option<Datagram>,
    released: bool,
}

impl<W: Writer, T: Transport> WriteSession<W, T> {
    pub fn new(writer: W, transport: T, config: SessionConfig) -> Self {
        Self {
            writer,
            transport,
            config,
            blocknum: 0,
            completed: false,
            timer: None,
            in_flight: None,
            released: false,
        }
    }

    /// Drive the session until it terminates.
    ///
    /// `incoming` carries decoded datagrams from the transport host;
    /// dropping the sender cancels the session. The error covers failed
    /// transfers (backend failure, peer abort, retry exhaustion); the
    /// peer has already been notified where the protocol calls for it.
    pub async fn run(mut self, mut incoming: mpsc::Receiver<Datagram>) -> Result<()> {
        let result = self.drive(&mut incoming).await;
        self.release().await;
        result
    }

    async fn drive(&mut self, incoming: &mut mpsc::Receiver<Datagram>) -> Result<()> {
        self.start().await?;

        loop {
            let event = tokio::select! {
                ev = tick_or_pending(&mut self.timer) => Event::Timer(ev),
                dgram = incoming.recv() => Event::Inbound(dgram),
            };

            match event {
                Event::Inbound(Some(Datagram::Data { block, payload })) => {
                    self.on_data(block, payload).await?;
                }
                Event::Inbound(Some(Datagram::Error { code, message })) => {
                    return self.on_peer_error(code, &message);
                }
                Event::Inbound(Some(other)) => {
                    tracing::debug!("ignoring unexpected {} during write session", other.opcode());
                }
                Event::Inbound(None) => return self.on_cancelled(),
                Event::Timer(RetryEvent::Retransmit) => self.retransmit().await?,
                Event::Timer(RetryEvent::GiveUp) => return self.on_timeout(),
            }
        }
    }

    /// Acknowledge the request itself as block 0 and wait for DATA(1).
    async fn start(&mut self) -> Result<()> {
        let ack = Datagram::Ack { block: 0 };
        self.transport
            .send(&ack)
            .await
            .context("failed to send initial ACK")?;
        self.in_flight = Some(ack);
        self.timer = arm(&self.config);
        Ok(())
    }

    async fn on_data(&mut self, block: u16, payload: Vec<u8>) -> Result<()> {
        let expected = self.blocknum.wrapping_add(1);

        if block == expected && !self.completed {
            // The block we were waiting for; the ACK schedule for the
            // previous block is done.
            disarm(&mut self.timer);

            if let Err(e) = self.accept_block(&payload).await {
                tracing::warn!("backend write failed: {}", e);
                let _ = self
                    .transport
                    .send(&Datagram::error_from_code(TftpErrorCode::DiskFull))
                    .await;
                bail!("backend write failed: {}", e);
            }

            self.blocknum = expected;
            let ack = Datagram::Ack { block: expected };
            self.transport.send(&ack).await.context("failed to send ACK")?;
            self.in_flight = Some(ack);
            self.timer = arm(&self.config);
        } else if block == expected && self.completed {
            // The peer kept sending fresh data after the final block.
            self.transport
                .send(&Datagram::Error {
                    code: TftpErrorCode::IllegalOperation,
                    message: "Transfer already finished".to_string(),
                })
                .await
                .context("failed to send ERROR")?;
        } else if block_precedes(block, expected) {
            // Duplicate of a block we already accepted; its ACK was
            // probably lost. Answer it, touch nothing else.
            tracing::debug!("re-acknowledging duplicate block {}", block);
            self.transport
                .send(&Datagram::Ack { block })
                .await
                .context("failed to re-send ACK")?;
        } else {
            tracing::debug!("got block {}, expected {}", block, expected);
            self.transport
                .send(&Datagram::Error {
                    code: TftpErrorCode::IllegalOperation,
                    message: "Block number mismatch".to_string(),
                })
                .await
                .context("failed to send ERROR")?;
        }

        Ok(())
    }

    /// Hand one block to the writer, committing on the final one.
    ///
    /// `completed` flips only after a successful commit, so every
    /// failure leaves the session on the cancel-the-writer path.
    async fn accept_block(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.writer.write(payload).await?;
        if payload.len() < self.config.block_size {
            self.writer.finish().await?;
            self.completed = true;
        }
        Ok(())
    }

    async fn retransmit(&mut self) -> Result<()> {
        if let Some(dgram) = &self.in_flight {
            tracing::debug!("retransmitting {}", dgram);
            self.transport.send(dgram).await.context("retransmit failed")?;
        }
        Ok(())
    }

    fn on_timeout(&mut self) -> Result<()> {
        if self.completed {
            // Lingered long enough for a duplicate of the final block;
            // nothing more will come and nothing was lost.
            tracing::debug!("write session finished, linger expired");
            Ok(())
        } else {
            bail!(
                "timed out waiting for block {}",
                self.blocknum.wrapping_add(1)
            );
        }
    }

    fn on_peer_error(&mut self, code: TftpErrorCode, message: &str) -> Result<()> {
        if self.completed {
            tracing::debug!("peer error after completed transfer: {}: {}", code, message);
            Ok(())
        } else {
            bail!("peer aborted transfer: {}: {}", code, message);
        }
    }

    fn on_cancelled(&mut self) -> Result<()> {
        if self.completed {
            Ok(())
        } else {
            bail!("session cancelled");
        }
    }

    /// Release the writer. Runs on every terminal path, effective once.
    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if !self.completed {
            if let Err(e) = self.writer.cancel().await {
                tracing::warn!("failed to cancel writer: {}", e);
            }
        }
    }
}

/// Whether `block` refers to an already-acknowledged block, given the
/// one we expect next. Plain ordering on the wrapped numbers; transfers
/// crossing the 65536-block rollover misclassify duplicates at the
/// boundary.
fn block_precedes(block: u16, expected: u16) -> bool {
    block < expected
}
