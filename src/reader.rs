//! Reads length-delimited log records from an open byte stream (in
//! production, a FIFO), resynchronizing the decoder -- without reopening the
//! underlying handle -- whenever a frame is malformed or oversized.

use bytes::BytesMut;
use log_codec::{LogRecord, LogRecordDecoder};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;
use tracing::warn;

/// Outcome of one [`FramedFifoReader::next`] call.
#[derive(Debug)]
pub enum ReadOutcome {
    Record(LogRecord),
    /// The writer side closed and all buffered bytes have been consumed.
    /// Terminal: the caller must close the stream and exit.
    Eof,
}

/// Decodes a sequence of [`LogRecord`]s from an open byte stream.
///
/// A malformed or oversized frame never reaches the caller: it's logged and
/// the decoder is recreated over the same underlying reader before the next
/// frame is attempted, since the writer side may recover mid-stream.
pub struct FramedFifoReader<R> {
    reader: R,
    decoder: LogRecordDecoder,
    buf: BytesMut,
}

impl<R> FramedFifoReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        FramedFifoReader {
            reader,
            decoder: LogRecordDecoder::default(),
            buf: BytesMut::new(),
        }
    }

    /// Returns the next record, or [`ReadOutcome::Eof`] once the stream is
    /// closed and drained.
    pub async fn next(&mut self) -> std::io::Result<ReadOutcome> {
        loop {
            match self.decoder.decode(&mut self.buf) {
                Ok(Some(record)) => return Ok(ReadOutcome::Record(record)),
                Ok(None) => {}
                Err(error) => {
                    warn!(message = "dropping malformed frame, resynchronizing decoder", %error);
                    self.decoder = LogRecordDecoder::default();
                    self.buf.clear();
                    continue;
                }
            }

            let read = self.reader.read_buf(&mut self.buf).await?;
            if read == 0 {
                return match self.decoder.decode_eof(&mut self.buf) {
                    Ok(Some(record)) => Ok(ReadOutcome::Record(record)),
                    Ok(None) => Ok(ReadOutcome::Eof),
                    Err(error) => {
                        warn!(message = "dropping trailing malformed frame at eof", %error);
                        Ok(ReadOutcome::Eof)
                    }
                };
            }
        }
    }
}

impl<R> std::fmt::Debug for FramedFifoReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedFifoReader")
            .field("buffered", &self.buf.len())
            .finish()
    }
}
