use std::{io, net::SocketAddr};

use anyhow::{Context, Result, bail};
use futures::FutureExt;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        TcpStream, lookup_host,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::{debug, info, warn};

use crate::{framer::LineFramer, protocol::ClientCommand};

/// Result of polling a reader once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    /// Nothing available right now.
    Pending,
    Closed,
}

/// Polls `reader` exactly once without waiting.
///
/// `buf` must not be empty, otherwise a zero-length read is mistaken for end
/// of stream.
pub fn read_available<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<ReadOutcome>
where
    R: AsyncRead + Unpin,
{
    match reader.read(buf).now_or_never() {
        None => Ok(ReadOutcome::Pending),
        Some(Ok(0)) => Ok(ReadOutcome::Closed),
        Some(Ok(n)) => Ok(ReadOutcome::Data(n)),
        Some(Err(err)) if err.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::Pending),
        Some(Err(err)) => Err(err),
    }
}

/// A reader paired with the framer that owns its unterminated bytes.
pub struct LineStream<R> {
    label: &'static str,
    reader: R,
    framer: LineFramer,
    scratch: Vec<u8>,
    closed: bool,
}

impl<R> LineStream<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(label: &'static str, reader: R, capacity: usize) -> Self {
        let framer = LineFramer::new(capacity);
        let scratch = vec![0; framer.capacity()];
        Self {
            label,
            reader,
            framer,
            scratch,
            closed: false,
        }
    }

    /// True once the underlying reader reported end of stream.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next complete line if one can be produced without waiting.
    ///
    /// Reads are bounded by the framer's free space, so a line longer than
    /// the capacity surfaces as an overflow error.
    pub fn try_next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.framer.next_line() {
                return Ok(Some(line));
            }
            if self.closed {
                return Ok(None);
            }

            self.framer
                .ensure_room()
                .with_context(|| format!("{} line too long", self.label))?;
            let room = self.framer.remaining();
            let outcome = read_available(&mut self.reader, &mut self.scratch[..room])
                .with_context(|| format!("failed to read from {}", self.label))?;

            match outcome {
                ReadOutcome::Data(n) => self.framer.feed(&self.scratch[..n])?,
                ReadOutcome::Pending => return Ok(None),
                ReadOutcome::Closed => return Ok(self.finish()),
            }
        }
    }

    /// Next complete line, waiting for data. `None` once the stream ends.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.framer.next_line() {
                return Ok(Some(line));
            }
            if self.closed {
                return Ok(None);
            }

            self.framer
                .ensure_room()
                .with_context(|| format!("{} line too long", self.label))?;
            let room = self.framer.remaining();
            let n = self
                .reader
                .read(&mut self.scratch[..room])
                .await
                .with_context(|| format!("failed to read from {}", self.label))?;

            if n == 0 {
                return Ok(self.finish());
            }
            self.framer.feed(&self.scratch[..n])?;
        }
    }

    fn finish(&mut self) -> Option<String> {
        debug!(stream = self.label, "end of stream");
        self.closed = true;
        self.framer.take_remainder()
    }
}

/// Write half of the server connection.
///
/// Encoded commands go through `unsent`, so a `send` dropped mid-write
/// leaves the rest of its command queued. The next `send` writes that tail
/// before its own bytes and the server never sees a torn line.
pub struct ServerWriter<W> {
    writer: W,
    unsent: Vec<u8>,
}

impl<W> ServerWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            unsent: Vec::new(),
        }
    }

    pub async fn send(&mut self, command: &ClientCommand) -> Result<()> {
        debug!(%command, "sending to server");
        self.unsent.extend_from_slice(command.encode().as_bytes());
        self.flush_unsent().await
    }

    /// Bytes of an interrupted command still waiting to be written.
    pub fn unsent(&self) -> usize {
        self.unsent.len()
    }

    async fn flush_unsent(&mut self) -> Result<()> {
        while !self.unsent.is_empty() {
            let written = self
                .writer
                .write(&self.unsent)
                .await
                .context("failed to write to server")?;
            if written == 0 {
                bail!("failed to write to server: connection closed");
            }
            self.unsent.drain(..written);
        }
        self.writer
            .flush()
            .await
            .context("failed to flush server connection")?;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        if let Err(error) = self.writer.shutdown().await {
            warn!(?error, "failed to shutdown server writer cleanly");
        }
    }
}

/// Resolves `host`, connects to the first address that accepts, and splits
/// the socket into a framed reader and a writer.
pub async fn connect(
    host: &str,
    port: u16,
    capacity: usize,
) -> Result<(LineStream<OwnedReadHalf>, ServerWriter<OwnedWriteHalf>)> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {host}"))?
        .collect();
    if addrs.is_empty() {
        bail!("no such host: {host}");
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream
                    .set_nodelay(true)
                    .context("failed to configure server socket")?;
                info!(%addr, "connected to server");

                let (reader, writer) = stream.into_split();
                return Ok((
                    LineStream::new("server", reader, capacity),
                    ServerWriter::new(writer),
                ));
            }
            Err(error) => {
                debug!(%addr, ?error, "connect attempt failed");
                last_error = Some(error);
            }
        }
    }

    match last_error {
        Some(error) => Err(error).with_context(|| format!("failed to connect to {host}:{port}")),
        None => bail!("failed to connect to {host}:{port}"),
    }
}
