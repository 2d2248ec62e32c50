//! Per-stream pipeline: reader -> transformer -> sink, spilling to the
//! spool whenever the sink is unreachable.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::Notify;
use tracing::{info, info_span, warn, Instrument};

use crate::model::ContainerInfo;
use crate::reader::{FramedFifoReader, ReadOutcome};
use crate::sink::SinkClient;
use crate::spool::Spool;
use crate::transformer::transform;

/// Runs the pipeline loop for one stream until the FIFO is closed (EOF) or
/// `shutdown` is notified.
///
/// Records that fail to reach the sink are appended to `spool` and a
/// rotate/replay cycle is kicked off; the worker never retries a record
/// against the sink itself and never exits on a sink failure.
pub async fn run<R>(
    pipe_path: PathBuf,
    mut reader: FramedFifoReader<R>,
    info: ContainerInfo,
    spool: Spool,
    sink: SinkClient,
    shutdown: Arc<Notify>,
) where
    R: AsyncRead + Unpin,
{
    let span = info_span!("stream", container_id = %info.id, pipe = %pipe_path.display());
    async move {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    info!(message = "stopping stream on request");
                    break;
                }
                outcome = reader.next() => outcome,
            };

            let record = match outcome {
                Ok(ReadOutcome::Record(record)) => record,
                Ok(ReadOutcome::Eof) => {
                    info!(message = "fifo closed, exiting stream");
                    break;
                }
                Err(error) => {
                    warn!(message = "error reading from fifo, exiting stream", %error);
                    break;
                }
            };

            let envelope = transform(&record, &info);

            if sink.write(&envelope).await.is_err() {
                if let Err(error) = spool.append(&envelope).await {
                    warn!(message = "failed to spool record, dropping it", %error);
                }
                spool.rotate_and_drain_async(sink.clone());
            }
        }
    }
    .instrument(span)
    .await;
}
