use std::time::Duration;

use async_stream::try_stream;
use blob_store::BlobResult;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::{
    error::{DatasetError, DatasetResult},
    format::Codec,
};

/// Re-chunks a blob read stream into lines, sleeping `delay` between lines.
///
/// Each emitted chunk is one complete line including its `\n`; a trailing
/// line without a terminator is emitted as-is, so the chunks concatenate back
/// to the source bytes. Every line is passed to `codec.check_line` before it
/// is emitted. The source is only polled when the next line is needed, and
/// dropping the returned stream drops the source with it.
pub fn paced_lines<S>(
    source: S,
    codec: &'static dyn Codec,
    delay: Duration,
) -> impl Stream<Item = DatasetResult<Bytes>> + Send + 'static
where
    S: Stream<Item = BlobResult<Bytes>> + Send + Unpin + 'static,
{
    try_stream! {
        let mut source = source;
        let mut pending = BytesMut::new();
        // Bytes of `pending` already known to hold no newline.
        let mut scanned = 0;
        let mut emitted = false;

        while let Some(chunk) = source.next().await {
            let chunk = chunk.map_err(DatasetError::from)?;
            pending.extend_from_slice(&chunk);
            while let Some(offset) = pending[scanned..].iter().position(|b| *b == b'\n') {
                let line = pending.split_to(scanned + offset + 1).freeze();
                scanned = 0;
                check(codec, &line)?;
                if emitted && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                emitted = true;
                yield line;
            }
            scanned = pending.len();
        }

        if !pending.is_empty() {
            let line = pending.freeze();
            check(codec, &line)?;
            if emitted && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            yield line;
        }
    }
}

fn check(codec: &dyn Codec, line: &[u8]) -> DatasetResult<()> {
    let text = std::str::from_utf8(line)
        .map_err(|e| DatasetError::malformed(format!("not utf-8 text: {e}")))?;
    codec.check_line(text)
}
