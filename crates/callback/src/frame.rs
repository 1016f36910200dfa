//! Envelope-to-frame encoding.
//!
//! The listener has historically received each envelope as a JSON
//! *string* whose content is the envelope object, followed by a newline:
//!
//! ```text
//! "{\"api\":\"sdapi/v1/txt2img\",\"task_id\":\"...\",\"status\":200,\"body\":\"...\"}"
//! ```
//!
//! That is the default ([`FrameEncoding::QuotedJson`]). Listeners that
//! parse the envelope directly can opt into [`FrameEncoding::Object`].

use std::fmt;
use std::str::FromStr;

use sdrelay_core::envelope::ResultEnvelope;

/// How a [`ResultEnvelope`] is rendered into a text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameEncoding {
    /// Envelope JSON wrapped in a JSON string literal, newline-terminated.
    #[default]
    QuotedJson,
    /// Envelope JSON object as-is.
    Object,
}

impl FrameEncoding {
    /// Render `envelope` as frame text.
    pub fn encode(self, envelope: &ResultEnvelope) -> Result<String, serde_json::Error> {
        let object = serde_json::to_string(envelope)?;
        match self {
            Self::Object => Ok(object),
            Self::QuotedJson => {
                let mut quoted = serde_json::to_string(&object)?;
                quoted.push('\n');
                Ok(quoted)
            }
        }
    }
}

impl fmt::Display for FrameEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotedJson => f.write_str("quoted"),
            Self::Object => f.write_str("object"),
        }
    }
}

/// Returned when parsing an unknown encoding name.
#[derive(Debug, thiserror::Error)]
#[error("Unknown frame encoding '{0}', expected 'quoted' or 'object'")]
pub struct UnknownFrameEncoding(pub String);

impl FromStr for FrameEncoding {
    type Err = UnknownFrameEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quoted" | "quoted_json" => Ok(Self::QuotedJson),
            "object" => Ok(Self::Object),
            other => Err(UnknownFrameEncoding(other.to_string())),
        }
    }
}
