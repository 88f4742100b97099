//! General-purpose message formats.

use serde::{Deserialize, Serialize};

use crate::codec::MessageFormat;

/// Free-form text event published by modules and operator tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    /// The message contents.
    #[serde(rename = "Contents")]
    pub contents: String,
}

impl Text {
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
        }
    }
}

impl MessageFormat for Text {
    const TYPE_TAG: &'static str = "Seisbus.Format.Text";
}

/// Broker-synthesized failure reply.
///
/// Sent to a requester when the broker itself cannot satisfy a request
/// (unknown module, malformed frames). Application handlers never
/// produce this type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Human-readable description of what went wrong.
    #[serde(rename = "Details")]
    pub details: String,
}

impl Failure {
    pub fn new(details: impl Into<String>) -> Self {
        Self {
            details: details.into(),
        }
    }
}

impl MessageFormat for Failure {
    const TYPE_TAG: &'static str = "Seisbus.Format.Failure";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn text_roundtrip() {
        let text = Text::new("A text message");
        let bytes = codec::encode(&text).unwrap();
        assert_eq!(codec::decode::<Text>(&bytes).unwrap(), text);
    }

    #[test]
    fn failure_roundtrip() {
        let failure = Failure::new("Unknown module: quake_picker");
        let bytes = codec::encode(&failure).unwrap();
        assert_eq!(codec::decode::<Failure>(&bytes).unwrap(), failure);
    }
}
