//! Line transport for the control socket.
//!
//! Owns the raw stream halves. The reader frames bytes into CRLF-terminated
//! lines, the writer frames and flushes outgoing commands. Neither looks at
//! line content beyond framing.

use crate::config::ConnectionAddress;
use crate::error::{Result, TorControlError};
use crate::protocol::format_message;
pub use crate::protocol::DEFAULT_MAX_LINE_LENGTH;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tracing::trace;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half of the transport.
pub struct LineReader {
    reader: BufReader<BoxedReader>,
    max_line_length: usize,
}

impl LineReader {
    /// Wrap a raw read half.
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static, max_line_length: usize) -> Self {
        Self {
            reader: BufReader::new(Box::new(reader)),
            max_line_length,
        }
    }

    /// Read the next complete line, without its CRLF terminator.
    ///
    /// Fails with [`TorControlError::ConnectionClosed`] on a clean EOF between
    /// lines, and with [`TorControlError::Protocol`] on an oversized line, a
    /// line ending without CR, or EOF in the middle of a line.
    pub async fn receive(&mut self) -> Result<String> {
        let mut line = Vec::new();

        loop {
            let buffer = self.reader.fill_buf().await?;
            if buffer.is_empty() {
                if line.is_empty() {
                    return Err(TorControlError::ConnectionClosed);
                }
                return Err(TorControlError::Protocol(format!(
                    "Connection closed in the middle of a line ({} bytes buffered)",
                    line.len()
                )));
            }

            match buffer.iter().position(|byte| *byte == b'\n') {
                Some(newline_index) => {
                    let to_take = newline_index + 1;
                    if line.len() + to_take > self.max_line_length {
                        return Err(self.oversized());
                    }
                    line.extend_from_slice(&buffer[..to_take]);
                    self.reader.consume(to_take);
                    break;
                }
                None => {
                    let to_take = buffer.len();
                    if line.len() + to_take > self.max_line_length {
                        return Err(self.oversized());
                    }
                    line.extend_from_slice(buffer);
                    self.reader.consume(to_take);
                }
            }
        }

        let Some(content) = line.strip_suffix(b"\r\n") else {
            return Err(TorControlError::Protocol(format!(
                "Line is not terminated by CRLF: {:?}",
                String::from_utf8_lossy(&line)
            )));
        };

        let text = String::from_utf8_lossy(content).into_owned();
        trace!("Received line: {}", text);
        Ok(text)
    }

    fn oversized(&self) -> TorControlError {
        TorControlError::Protocol(format!(
            "Line exceeds maximum length of {} bytes",
            self.max_line_length
        ))
    }
}

/// Write half of the transport.
pub struct LineWriter {
    writer: BufWriter<BoxedWriter>,
}

impl LineWriter {
    /// Wrap a raw write half.
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: BufWriter::new(Box::new(writer)),
        }
    }

    /// Frame and write one command, then flush.
    pub async fn send(&mut self, command: &str) -> Result<()> {
        let framed = format_message(command)?;
        trace!("Sending command: {}", framed.trim_end());

        self.writer.write_all(framed.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut down the write direction.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Split any duplex stream into transport halves.
pub fn split<S>(stream: S, max_line_length: usize) -> (LineReader, LineWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    (
        LineReader::new(read_half, max_line_length),
        LineWriter::new(write_half),
    )
}

/// Open a socket to the control port.
pub async fn connect(
    address: &ConnectionAddress,
    max_line_length: usize,
) -> Result<(LineReader, LineWriter)> {
    match address {
        ConnectionAddress::Tcp(addr) => {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            let (read_half, write_half) = stream.into_split();
            Ok((
                LineReader::new(read_half, max_line_length),
                LineWriter::new(write_half),
            ))
        }
        #[cfg(unix)]
        ConnectionAddress::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            let (read_half, write_half) = stream.into_split();
            Ok((
                LineReader::new(read_half, max_line_length),
                LineWriter::new(write_half),
            ))
        }
        #[cfg(not(unix))]
        ConnectionAddress::Unix(path) => Err(TorControlError::Configuration(format!(
            "Unix sockets are not supported on this platform: {}",
            path.display()
        ))),
    }
}
