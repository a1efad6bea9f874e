// Transport framing for tagged payloads over a byte stream.
//
// The tagged text format (see `message.rs`) carries no delimiters of its own,
// so a stream transport needs a way to find payload boundaries. Two modes:
//
// - `Raw` (default): no framing at all, the payload is the tagged text. Each
//   successful read of up to `RAW_READ_SIZE` bytes is treated as one
//   payload. This is the format existing peers speak; it relies on the
//   transport preserving write boundaries and breaks when writes coalesce.
// - `LengthPrefixed` (opt-in): a 4-byte big-endian length, then the payload.
//   Both peers must enable it.
//
// Both sides of a connection must use the same mode. The functions operate on
// raw `&[u8]` / `Vec<u8>` so this module stays format-agnostic.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

/// Maximum allowed length-prefixed payload (64 KB). Protects against
/// unbounded allocation from malformed length prefixes; protocol messages are
/// a few dozen bytes.
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

/// Read buffer size for `Framing::Raw`.
pub const RAW_READ_SIZE: usize = 1024;

/// How payloads are delimited on a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    #[default]
    Raw,
    LengthPrefixed,
}

impl Framing {
    /// Largest payload this framing can carry in one frame. A raw reader
    /// sees at most `RAW_READ_SIZE` bytes per read, so anything longer would
    /// arrive split.
    pub fn max_payload(self) -> usize {
        match self {
            Self::Raw => RAW_READ_SIZE,
            Self::LengthPrefixed => MAX_MESSAGE_SIZE as usize,
        }
    }

    /// Write one payload using this framing, then flush.
    pub fn write_frame<W: Write>(self, writer: &mut W, payload: &[u8]) -> io::Result<()> {
        match self {
            Self::LengthPrefixed => write_message(writer, payload),
            Self::Raw => {
                writer.write_all(payload)?;
                writer.flush()
            }
        }
    }

    /// Read one payload using this framing. A clean end of stream is reported
    /// as `UnexpectedEof` in both modes.
    pub fn read_frame<R: Read>(self, reader: &mut R) -> io::Result<Vec<u8>> {
        match self {
            Self::LengthPrefixed => read_message(reader),
            Self::Raw => read_chunk(reader),
        }
    }
}

/// Write a length-delimited message: 4-byte big-endian length, then payload.
pub fn write_message<W: Write>(writer: &mut W, msg: &[u8]) -> io::Result<()> {
    let len = u32::try_from(msg.len())
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "message too large: {} bytes (max {MAX_MESSAGE_SIZE})",
                    msg.len()
                ),
            )
        })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(msg)?;
    writer.flush()?;
    Ok(())
}

/// Read a length-delimited message: 4-byte big-endian length, then payload.
///
/// Returns `UnexpectedEof` if the stream closes cleanly before or during a
/// message. Returns `InvalidData` if the length exceeds `MAX_MESSAGE_SIZE`.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read whatever the transport delivers next (at least one byte).
pub fn read_chunk<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut buf = [0u8; RAW_READ_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => return Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip_empty_message() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"").unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0]);

        let mut cursor = Cursor::new(&buf);
        assert!(read_message(&mut cursor).unwrap().is_empty());
    }

    #[test]
    fn rejects_oversized_write() {
        let big = vec![0u8; MAX_MESSAGE_SIZE as usize + 1];
        let mut buf = Vec::new();
        let err = write_message(&mut buf, &big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_read() {
        let fake_len = (MAX_MESSAGE_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(fake_len.to_vec());
        let err = read_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_unexpected_eof() {
        // Only 2 bytes when 4 are needed for the length prefix.
        let mut cursor = Cursor::new(vec![0u8, 1]);
        let err = read_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn length_prefixed_keeps_coalesced_payloads_apart() {
        let payloads: Vec<&[u8]> = vec![b"#NEW_SONG_ADDED#0", b"#CURRENTLY_PLAYING#0"];
        let mut buf = Vec::new();
        for payload in &payloads {
            Framing::LengthPrefixed.write_frame(&mut buf, payload).unwrap();
        }

        let mut cursor = Cursor::new(&buf);
        for expected in &payloads {
            let recovered = Framing::LengthPrefixed.read_frame(&mut cursor).unwrap();
            assert_eq!(recovered, *expected);
        }
    }

    #[test]
    fn default_framing_is_raw() {
        assert_eq!(Framing::default(), Framing::Raw);
        assert_eq!(Framing::Raw.max_payload(), RAW_READ_SIZE);
        assert_eq!(
            Framing::LengthPrefixed.max_payload(),
            MAX_MESSAGE_SIZE as usize
        );
    }

    #[test]
    fn raw_writes_payload_verbatim() {
        let mut buf = Vec::new();
        Framing::Raw.write_frame(&mut buf, b"#HOST_DISCONNECT#").unwrap();
        assert_eq!(buf, b"#HOST_DISCONNECT#");
    }

    #[test]
    fn raw_read_returns_available_bytes_then_eof() {
        let mut cursor = Cursor::new(b"#NEW_SONG_ADDED#3".to_vec());
        assert_eq!(
            Framing::Raw.read_frame(&mut cursor).unwrap(),
            b"#NEW_SONG_ADDED#3"
        );
        let err = Framing::Raw.read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn raw_read_is_bounded_by_buffer_size() {
        let data = vec![b'x'; RAW_READ_SIZE + 10];
        let mut cursor = Cursor::new(data);
        assert_eq!(read_chunk(&mut cursor).unwrap().len(), RAW_READ_SIZE);
        assert_eq!(read_chunk(&mut cursor).unwrap().len(), 10);
    }
}
