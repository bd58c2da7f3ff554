//! Streaming chat primitives.
//!
//! A streamed chat completion is a sequence of [`ChatCompletionChunk`]s ending
//! when the server closes the event stream. Transport and parse errors are
//! surfaced in-band; callers usually stop at the first one.

use crate::error::CoreResult;
use crate::model::ChatCompletionChunk;

/// Boxed stream of chat chunks, as returned for `stream: true` requests.
pub type ChunkStream = futures::stream::BoxStream<'static, CoreResult<ChatCompletionChunk>>;

/// Concatenate the first choice's deltas of already-collected chunks.
pub fn collect_text(chunks: &[ChatCompletionChunk]) -> String {
    chunks
        .iter()
        .filter_map(|c| c.choices.first())
        .filter_map(|c| c.delta.content.as_deref())
        .collect()
}
