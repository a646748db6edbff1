//! Buffered PDU exchange over a byte-stream transport.

use std::io::{Cursor, Read, Write};
use std::net::TcpStream;

use bytes::{Buf, BytesMut};
use snafu::{ensure, Backtrace, ResultExt, Snafu};

use crate::pdu::{read_pdu, reader, write_pdu, writer, Pdu};
use crate::statistics::MeteredStream;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// failed to decode the incoming PDU
    Decode {
        #[snafu(backtrace)]
        source: reader::Error,
    },

    /// failed to encode the outgoing PDU
    Encode {
        #[snafu(backtrace)]
        source: writer::Error,
    },

    /// failed to read from the transport
    Read {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to write to the transport
    Write {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// the peer closed the transport connection
    ConnectionClosed { backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether this error was caused by a wall-clock deadline expiry
    /// on the transport.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Read { source, .. } | Error::Write { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// The capabilities the drivers require from a transport stream.
///
/// Any duplex byte stream qualifies;
/// streams that can be polled without blocking
/// additionally support cooperative cancellation checks
/// between multi-response emissions.
pub trait Transport: Read + Write {
    /// Shut down the transport in both directions.
    fn close(&mut self) -> std::io::Result<()>;

    /// Best-effort non-blocking read into `buffer`.
    ///
    /// Returns the number of bytes appended;
    /// zero when no data is pending
    /// or when the stream cannot be polled without blocking.
    fn try_fill(&mut self, _buffer: &mut BytesMut) -> std::io::Result<usize> {
        Ok(0)
    }
}

impl Transport for TcpStream {
    fn close(&mut self) -> std::io::Result<()> {
        TcpStream::shutdown(self, std::net::Shutdown::Both)
    }

    fn try_fill(&mut self, buffer: &mut BytesMut) -> std::io::Result<usize> {
        self.set_nonblocking(true)?;
        let mut total = 0;
        let outcome = loop {
            let mut chunk = [0_u8; 4096];
            match self.read(&mut chunk) {
                Ok(0) => break Ok(total),
                Ok(count) => {
                    buffer.extend_from_slice(&chunk[..count]);
                    total += count;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break Ok(total),
                Err(e) => break Err(e),
            }
        };
        self.set_nonblocking(false)?;
        outcome
    }
}

impl<S> Transport for MeteredStream<S>
where
    S: Transport,
{
    fn close(&mut self) -> std::io::Result<()> {
        self.get_mut().close()
    }

    fn try_fill(&mut self, buffer: &mut BytesMut) -> std::io::Result<usize> {
        let count = self.get_mut().try_fill(buffer)?;
        self.statistics().add_bytes_read(count as u64);
        Ok(count)
    }
}

/// Try to parse one complete PDU out of the buffered bytes,
/// consuming them on success.
pub fn take_buffered_pdu(
    buffer: &mut BytesMut,
    max_pdu_length: u32,
    strict: bool,
) -> Result<Option<Pdu>> {
    let mut cursor = Cursor::new(&buffer[..]);
    match read_pdu(&mut cursor, max_pdu_length, strict).context(DecodeSnafu)? {
        Some(pdu) => {
            let consumed = cursor.position() as usize;
            buffer.advance(consumed);
            Ok(Some(pdu))
        }
        None => Ok(None),
    }
}

/// Read one PDU from the transport,
/// gathering bytes into `buffer` until a full PDU is available.
pub fn read_pdu_from_wire<R>(
    stream: &mut R,
    buffer: &mut BytesMut,
    max_pdu_length: u32,
    strict: bool,
) -> Result<Pdu>
where
    R: Read,
{
    loop {
        if let Some(pdu) = take_buffered_pdu(buffer, max_pdu_length, strict)? {
            return Ok(pdu);
        }
        let mut chunk = [0_u8; 8192];
        let count = stream.read(&mut chunk).context(ReadSnafu)?;
        ensure!(count > 0, ConnectionClosedSnafu);
        buffer.extend_from_slice(&chunk[..count]);
    }
}

/// Encode and send one PDU over the transport,
/// reusing `write_buffer` for the encoded bytes.
pub fn write_pdu_to_wire<W>(stream: &mut W, write_buffer: &mut Vec<u8>, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    write_buffer.clear();
    write_pdu(write_buffer, pdu).context(EncodeSnafu)?;
    stream.write_all(write_buffer).context(WriteSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    #[test]
    fn buffered_parse_waits_for_a_full_pdu() {
        let mut encoded = Vec::new();
        write_pdu(&mut encoded, &Pdu::ReleaseRQ).unwrap();

        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&encoded[..encoded.len() - 1]);
        assert_matches!(
            take_buffered_pdu(&mut buffer, crate::pdu::DEFAULT_MAX_PDU, true),
            Ok(None)
        );
        // the partial bytes stay buffered
        assert_eq!(buffer.len(), encoded.len() - 1);

        buffer.extend_from_slice(&encoded[encoded.len() - 1..]);
        assert_matches!(
            take_buffered_pdu(&mut buffer, crate::pdu::DEFAULT_MAX_PDU, true),
            Ok(Some(Pdu::ReleaseRQ))
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn wire_read_detects_closed_connections() {
        let mut stream: &[u8] = &[];
        let mut buffer = BytesMut::new();
        let outcome = read_pdu_from_wire(
            &mut stream,
            &mut buffer,
            crate::pdu::DEFAULT_MAX_PDU,
            true,
        );
        assert_matches!(outcome, Err(Error::ConnectionClosed { .. }));
    }
}
