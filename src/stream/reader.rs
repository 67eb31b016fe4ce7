//! Reader task: pulls chunks from a [`ChunkSource`], decodes them and
//! forwards events to the session in arrival order.

use tokio::sync::mpsc;

use super::decoder::EventDecoder;
use super::event::StreamEvent;
use super::source::ChunkSource;

/// Drive `source` to completion, sending every decoded event on `tx`.
///
/// Returns when the producer closes the stream, the connection fails, or the
/// receiving session goes away.  A read failure counts as end of stream.
/// Dropping `tx` on return is what tells the session the stream is over.
pub async fn pump_events(mut source: Box<dyn ChunkSource>, tx: mpsc::Sender<StreamEvent>) {
    let mut decoder = EventDecoder::new();
    let mut chunks = 0usize;

    loop {
        match source.next_chunk().await {
            Ok(Some(chunk)) => {
                chunks += 1;
                for event in decoder.push(&chunk) {
                    if tx.send(event).await.is_err() {
                        log::debug!("reader: session gone, stopping after {chunks} chunks");
                        return;
                    }
                }
            }
            Ok(None) => {
                log::info!("reader: stream closed by producer after {chunks} chunks");
                break;
            }
            Err(e) => {
                log::warn!("reader: {e}; treating as end of stream");
                break;
            }
        }
    }

    decoder.finish();
}
