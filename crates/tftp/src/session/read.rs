//! Read session: the sending half of a transfer.
//!
//! Drives an RRQ-initiated exchange: pull blocks from the backend
//! [`Reader`], send each as DATA and retransmit it until the matching
//! ACK arrives. The transfer ends when the ACK for a short final block
//! comes in, or when the retry schedule gives up. There is no linger on
//! this side: without that final ACK the peer never confirmed receipt,
//! so give-up is always a failure.

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;

use crate::backend::Reader;
use crate::protocol::{Datagram, TftpErrorCode};
use crate::retry::RetryEvent;
use crate::session::{Event, SessionConfig, Step, Transport, arm, disarm, tick_or_pending};

/// State machine sending a transfer.
///
/// Constructed by the dispatcher once an RRQ has been accepted and a
/// [`Reader`] resolved; consumed by [`run`](Self::run). The reader is
/// released through `finish` exactly once, on every terminal path.
pub struct ReadSession<R, T> {
    reader: R,
    transport: T,
    config: SessionConfig,
    /// Number of the block most recently sent.
    blocknum: u16,
    /// The short final block has been sent (but maybe not yet ACKed).
    completed: bool,
    timer: Option<crate::retry::RetryTimer>,
    /// DATA datagram to re-send when the timer asks for it.
    in_flight: Option<Datagram>,
    released: bool,
}

impl<R: Reader, T: Transport> ReadSession<R, T> {
    pub fn new(reader: R, transport: T, config: SessionConfig) -> Self {
        Self {
            reader,
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
    /// The first data block goes out immediately; from then on the
    /// session is purely ACK-driven. Dropping the `incoming` sender
    /// cancels the session.
    pub async fn run(mut self, mut incoming: mpsc::Receiver<Datagram>) -> Result<()> {
        let result = self.drive(&mut incoming).await;
        self.release().await;
        result
    }

    async fn drive(&mut self, incoming: &mut mpsc::Receiver<Datagram>) -> Result<()> {
        self.next_block().await?;

        loop {
            let event = tokio::select! {
                ev = tick_or_pending(&mut self.timer) => Event::Timer(ev),
                dgram = incoming.recv() => Event::Inbound(dgram),
            };

            match event {
                Event::Inbound(Some(Datagram::Ack { block })) => {
                    if self.on_ack(block).await? == Step::Finished {
                        return Ok(());
                    }
                }
                Event::Inbound(Some(Datagram::Error { code, message })) => {
                    bail!("peer aborted transfer: {}: {}", code, message);
                }
                Event::Inbound(Some(other)) => {
                    tracing::debug!("ignoring unexpected {} during read session", other.opcode());
                }
                Event::Inbound(None) => bail!("session cancelled"),
                Event::Timer(RetryEvent::Retransmit) => self.retransmit().await?,
                Event::Timer(RetryEvent::GiveUp) => {
                    // No linger here: even after the final block went
                    // out, a give-up means its ACK never arrived.
                    bail!(
                        "timed out waiting for ACK of block {}",
                        self.blocknum
                    );
                }
            }
        }
    }

    async fn on_ack(&mut self, block: u16) -> Result<Step> {
        if block == self.blocknum {
            disarm(&mut self.timer);
            if self.completed {
                // The short final block is confirmed; we are done.
                return Ok(Step::Finished);
            }
            self.next_block().await?;
        } else if block < self.blocknum {
            // The peer re-acknowledged an older block, most likely
            // because our DATA crossed its ACK in flight. The schedule
            // for the current block keeps running untouched.
            tracing::debug!("ignoring stale ACK for block {}", block);
        } else {
            tracing::debug!("got ACK for block {}, expected {}", block, self.blocknum);
            self.transport
                .send(&Datagram::Error {
                    code: TftpErrorCode::IllegalOperation,
                    message: "Block number mismatch".to_string(),
                })
                .await
                .context("failed to send ERROR")?;
        }
        Ok(Step::Continue)
    }

    /// Pull the next block from the reader and put it on the wire.
    async fn next_block(&mut self) -> Result<()> {
        let payload = match self.reader.read(self.config.block_size).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("backend read failed: {}", e);
                let _ = self
                    .transport
                    .send(&Datagram::Error {
                        code: TftpErrorCode::NotDefined,
                        message: "Read failed".to_string(),
                    })
                    .await;
                bail!("backend read failed: {}", e);
            }
        };

        self.blocknum = self.blocknum.wrapping_add(1);
        if payload.len() < self.config.block_size {
            self.completed = true;
        }

        let dgram = Datagram::Data {
            block: self.blocknum,
            payload,
        };
        self.transport.send(&dgram).await.context("failed to send DATA")?;
        self.in_flight = Some(dgram);
        self.timer = arm(&self.config);
        Ok(())
    }

    async fn retransmit(&mut self) -> Result<()> {
        if let Some(dgram) = &self.in_flight {
            tracing::debug!("retransmitting {}", dgram);
            self.transport.send(dgram).await.context("retransmit failed")?;
        }
        Ok(())
    }

    /// Release the reader. Runs on every terminal path, effective once.
    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.reader.finish().await {
            tracing::warn!("failed to release reader: {}", e);
        }
    }
}
