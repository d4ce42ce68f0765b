//! Streaming primitives exposed by aistream.
//!
//! Contract:
//! - A stream emits 0..n `ContentDelta` events in frame-decode order.
//! - On normal termination the last item is exactly one `Final` carrying the
//!   aggregated completion; nothing follows it.
//! - A terminal failure surfaces as the stream's last item being an `Err`;
//!   partial aggregate state is discarded, although deltas already yielded
//!   stay with whoever consumed them.

use std::pin::Pin;

use futures::Stream;

use crate::error::CoreResult;
use crate::model::Completion;

/// What the caller receives incrementally.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Partial assistant text (delta).
    ContentDelta(String),
    /// The finalized aggregate; stream ends after this.
    Final(Completion),
}

impl StreamEvent {
    /// Returns true if this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final(_))
    }

    /// Convenience accessor for `ContentDelta` contents.
    pub fn as_content_delta(&self) -> Option<&str> {
        match self {
            Self::ContentDelta(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Boxed stream of completion events, as handed to streaming consumers.
pub type CompletionStream = Pin<Box<dyn Stream<Item = CoreResult<StreamEvent>> + Send>>;
