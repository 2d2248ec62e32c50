//! Shapes a decoded [`log_codec::LogRecord`] into the outbound JSON envelope.

use bytes::{BufMut, Bytes, BytesMut};
use log_codec::LogRecord;

use crate::model::{ContainerInfo, Envelope, Source};

/// Produces one newline-terminated JSON object for the given record.
///
/// `message` is the record's line with Unicode whitespace trimmed from both
/// ends; an all-whitespace (or empty) line still produces an envelope, with
/// `message: ""`.
pub fn transform(record: &LogRecord, info: &ContainerInfo) -> Bytes {
    let message = String::from_utf8_lossy(&record.line);
    let envelope = Envelope {
        source: Source::from(record.source.as_str()).as_str(),
        message: message.trim().to_string(),
        container_id: info.id.clone(),
        container_name: info.name.clone(),
        container_image_name: info.image_name.clone(),
        container_created: info.created,
        attr: None,
        err: None,
    };

    let mut buf = BytesMut::new();
    let writer = (&mut buf).writer();
    serde_json::to_writer(writer, &envelope).expect("envelope serialization cannot fail");
    buf.put_u8(b'\n');
    buf.freeze()
}
