//! Decodes a stream of length-prefixed `LogEntry` protobuf records.
//!
//! Frames are `[u32 big-endian length][protobuf bytes]`, matching the wire
//! contract the container runtime host uses to feed log entries into a
//! container's log FIFO.

use bytes::{Bytes, BytesMut};
use prost::Message;
use snafu::{ResultExt, Snafu};
use tokio_util::codec::{Decoder, LengthDelimitedCodec};

pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/docker_logstash_driver.rs"));
}

pub use proto::LogEntry;

/// Largest protobuf payload accepted in a single frame.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// An error decoding a single frame from the byte stream.
///
/// Callers treat this as recoverable: the decoder should be recreated
/// against the same underlying stream and the next frame attempted.
#[derive(Debug, Snafu)]
pub enum FramingError {
    #[snafu(display("frame exceeds the {} byte limit", MAX_FRAME_LEN))]
    FrameTooLarge,

    #[snafu(display("i/o error reading frame: {source}"))]
    Io { source: std::io::Error },

    #[snafu(display("malformed protobuf payload: {source}"))]
    Protobuf { source: prost::DecodeError },
}

impl From<std::io::Error> for FramingError {
    fn from(source: std::io::Error) -> Self {
        // `LengthDelimitedCodec` reports oversized frames as an `InvalidData`
        // io::Error; surface those distinctly so callers can log and resync
        // without treating every io error the same way.
        if source.kind() == std::io::ErrorKind::InvalidData {
            FramingError::FrameTooLarge
        } else {
            FramingError::Io { source }
        }
    }
}

/// A decoded log record, prior to transformation into the outbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub source: String,
    pub time_nanos: i64,
    pub line: Bytes,
    pub partial: bool,
}

impl From<LogEntry> for LogRecord {
    fn from(entry: LogEntry) -> Self {
        LogRecord {
            source: entry.source,
            time_nanos: entry.time_nano,
            line: Bytes::from(entry.line),
            partial: entry.partial,
        }
    }
}

/// Decodes length-delimited protobuf `LogEntry` frames.
///
/// Wraps a fresh [`LengthDelimitedCodec`] per instance so that resynchronizing
/// after a [`FramingError`] is just constructing a new `LogRecordDecoder`
/// over the same byte stream.
#[derive(Debug)]
pub struct LogRecordDecoder {
    framer: LengthDelimitedCodec,
}

impl Default for LogRecordDecoder {
    fn default() -> Self {
        Self {
            framer: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .big_endian()
                .length_field_length(4)
                .new_codec(),
        }
    }
}

impl Decoder for LogRecordDecoder {
    type Item = LogRecord;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.framer.decode(src)? else {
            return Ok(None);
        };
        let entry = LogEntry::decode(frame.freeze()).context(ProtobufSnafu)?;
        Ok(Some(entry.into()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.framer.decode_eof(src)? else {
            return Ok(None);
        };
        let entry = LogEntry::decode(frame.freeze()).context(ProtobufSnafu)?;
        Ok(Some(entry.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_frame(entry: &LogEntry) -> BytesMut {
        let payload = entry.encode_to_vec();
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&payload);
        buf
    }

    #[test]
    fn decodes_single_frame() {
        let entry = LogEntry {
            source: "stdout".to_string(),
            time_nano: 1_700_000_000_000_000_000,
            line: b"hello\n".to_vec(),
            partial: false,
        };
        let mut buf = encode_frame(&entry);
        let mut decoder = LogRecordDecoder::default();

        let record = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(record.source, "stdout");
        assert_eq!(record.time_nanos, 1_700_000_000_000_000_000);
        assert_eq!(&record.line[..], b"hello\n");
        assert!(!record.partial);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decodes_multiple_frames_in_one_buffer() {
        let a = LogEntry {
            source: "stdout".into(),
            time_nano: 1,
            line: b"a".to_vec(),
            partial: false,
        };
        let b = LogEntry {
            source: "stderr".into(),
            time_nano: 2,
            line: b"b".to_vec(),
            partial: false,
        };
        let mut buf = encode_frame(&a);
        buf.extend_from_slice(&encode_frame(&b));

        let mut decoder = LogRecordDecoder::default();
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().line, "a");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().line, "b");
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let entry = LogEntry {
            source: "stdout".into(),
            time_nano: 1,
            line: b"hello".to_vec(),
            partial: false,
        };
        let full = encode_frame(&entry);
        let mut partial = BytesMut::from(&full[..full.len() - 1]);

        let mut decoder = LogRecordDecoder::default();
        assert_eq!(decoder.decode(&mut partial).unwrap(), None);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());

        let mut decoder = LogRecordDecoder::default();
        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FramingError::FrameTooLarge));
    }

    #[test]
    fn exactly_max_frame_len_is_accepted() {
        let entry = LogEntry {
            source: "stdout".into(),
            time_nano: 1,
            line: vec![b'x'; MAX_FRAME_LEN - 16],
            partial: false,
        };
        let mut buf = encode_frame(&entry);
        let mut decoder = LogRecordDecoder::default();
        let record = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(record.line.len(), MAX_FRAME_LEN - 16);
    }

    #[test]
    fn resync_after_oversized_frame_accepts_next_frame() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        buf.extend_from_slice(&vec![0u8; 16]);

        let mut decoder = LogRecordDecoder::default();
        assert!(decoder.decode(&mut buf).is_err());

        // Resynchronizing means dropping the old decoder (and any bytes it
        // had buffered) and starting a fresh one over the same stream.
        buf.clear();
        let good = LogEntry {
            source: "stdout".into(),
            time_nano: 3,
            line: b"ok".to_vec(),
            partial: false,
        };
        buf.extend_from_slice(&encode_frame(&good));
        let mut decoder = LogRecordDecoder::default();
        let record = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&record.line[..], b"ok");
    }
}
