//! Destination for result envelopes.
//!
//! The worker pipeline only needs "send this envelope somewhere". The
//! production implementation is the callback channel manager; tests
//! substitute an in-memory recorder.

use async_trait::async_trait;

use crate::envelope::ResultEnvelope;

/// Something that can deliver [`ResultEnvelope`]s to the remote listener.
#[async_trait]
pub trait EnvelopeSink: Send + Sync {
    /// Error returned when an envelope could not be written.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Deliver one envelope.
    ///
    /// Implementations must serialize concurrent calls so that envelopes
    /// never interleave on the wire.
    async fn send(&self, envelope: &ResultEnvelope) -> Result<(), Self::Error>;
}
