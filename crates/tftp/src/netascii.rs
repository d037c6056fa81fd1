//! Streaming netascii adapters
//!
//! Netascii transfers carry CR-LF line endings (and CR-NUL for a bare
//! carriage return) on the wire while files on disk keep their local
//! form. These adapters wrap a backend [`Reader`]/[`Writer`] and convert
//! on the fly.
//!
//! The tricky part is block boundaries: conversion is not length
//! preserving, and a CR at the end of one block cannot be translated
//! until the first byte of the next block is known. The adapters carry
//! that byte across calls, and the reader keeps refilling so it returns
//! a short block only when the converted stream is truly exhausted;
//! otherwise expansion could end a transfer early.

use std::io;

use crate::backend::{Reader, Writer};
use crate::protocol::{convert_from_netascii, convert_to_netascii};

/// Converts a local byte stream to netascii while reading.
#[derive(Debug)]
pub struct NetasciiReader<R> {
    inner: R,
    /// Converted bytes not yet handed out.
    buf: Vec<u8>,
    /// Trailing CR held back until the next chunk resolves it.
    pending: Option<u8>,
    inner_done: bool,
}

impl<R: Reader> NetasciiReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pending: None,
            inner_done: false,
        }
    }
}

impl<R: Reader> Reader for NetasciiReader<R> {
    async fn read(&mut self, size: usize) -> io::Result<Vec<u8>> {
        while self.buf.len() < size && !self.inner_done {
            let chunk = self.inner.read(size).await?;
            if chunk.len() < size {
                // Short inner read: end of the underlying data.
                self.inner_done = true;
            }

            let mut data = match self.pending.take() {
                Some(held) => {
                    let mut d = Vec::with_capacity(chunk.len() + 1);
                    d.push(held);
                    d.extend_from_slice(&chunk);
                    d
                }
                None => chunk,
            };

            // A trailing CR converts differently depending on what
            // follows; at end of stream there is nothing following and
            // the converter settles it as CR-NUL.
            if !self.inner_done && data.last() == Some(&b'\r') {
                data.pop();
                self.pending = Some(b'\r');
            }

            self.buf.extend_from_slice(&convert_to_netascii(&data));
        }

        let take = size.min(self.buf.len());
        Ok(self.buf.drain(..take).collect())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.inner.finish().await
    }
}

/// Converts netascii back to the local form while writing.
#[derive(Debug)]
pub struct NetasciiWriter<W> {
    inner: W,
    /// Trailing CR held back until the next block resolves it.
    pending: Option<u8>,
}

impl<W: Writer> NetasciiWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: None,
        }
    }
}

impl<W: Writer> Writer for NetasciiWriter<W> {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let mut data = match self.pending.take() {
            Some(held) => {
                let mut d = Vec::with_capacity(data.len() + 1);
                d.push(held);
                d.extend_from_slice(data);
                d
            }
            None => data.to_vec(),
        };

        if data.last() == Some(&b'\r') {
            data.pop();
            self.pending = Some(b'\r');
        }

        self.inner.write(&convert_from_netascii(&data)).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        if let Some(held) = self.pending.take() {
            // Stream ended on a bare CR; pass it through unchanged.
            self.inner.write(&[held]).await?;
        }
        self.inner.finish().await
    }

    async fn cancel(&mut self) -> io::Result<()> {
        self.inner.cancel().await
    }
}
