//! The two-frame wire envelope.
//!
//! Every application-level message travels as exactly two frames sent
//! atomically: frame 1 is the UTF-8 type tag, frame 2 is the opaque body
//! produced by the codec for that tag. Broker-added routing frames
//! (ROUTER identity, empty delimiter) wrap this envelope but never
//! change it.

use zeromq::ZmqMessage;

use crate::codec::{self, MessageFormat};
use crate::error::FabricError;

/// One application message on the wire: `(type_tag, body)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub type_tag: String,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn new(type_tag: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            type_tag: type_tag.into(),
            body,
        }
    }

    /// Encode a typed message into its wire envelope.
    pub fn pack<M: MessageFormat>(message: &M) -> Result<Self, FabricError> {
        Ok(Self::new(M::TYPE_TAG, codec::encode(message)?))
    }

    /// Decode the body as the given message format.
    ///
    /// The envelope tag must match the format's tag; the body header is
    /// verified by the codec as well.
    pub fn unpack<M: MessageFormat>(&self) -> Result<M, FabricError> {
        if self.type_tag != M::TYPE_TAG {
            return Err(FabricError::TypeMismatch {
                expected: M::TYPE_TAG.to_string(),
                actual: self.type_tag.clone(),
            });
        }
        codec::decode(&self.body)
    }

    /// Build the two-frame ZMQ message `[type_tag, body]`.
    pub fn to_zmq(&self) -> ZmqMessage {
        let mut message = ZmqMessage::from(self.type_tag.as_str());
        message.push_back(self.body.clone().into());
        message
    }

    /// Parse a received ZMQ message that must be exactly two frames.
    ///
    /// A wrong frame count is a malformed message: the caller logs it
    /// and drops the message.
    pub fn from_zmq(message: &ZmqMessage) -> Result<Self, FabricError> {
        let frames: Vec<&[u8]> = message.iter().map(|f| f.as_ref()).collect();
        Self::from_frames(&frames)
    }

    /// Parse the envelope from already-split frames (the tail of a
    /// routed multipart after the routing preamble was stripped).
    pub fn from_frames(frames: &[&[u8]]) -> Result<Self, FabricError> {
        if frames.len() != 2 {
            return Err(FabricError::FrameCount {
                expected: 2,
                actual: frames.len(),
            });
        }
        let type_tag = std::str::from_utf8(frames[0])
            .map_err(|_| FabricError::Transport("type tag frame is not UTF-8".into()))?
            .to_string();
        Ok(Self::new(type_tag, frames[1].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Probe {
        n: u64,
    }

    impl MessageFormat for Probe {
        const TYPE_TAG: &'static str = "Test.Envelope.Probe";
    }

    #[test]
    fn two_frame_construction() {
        let envelope = Envelope::new("Test.Tag", b"payload".to_vec());
        let zmq = envelope.to_zmq();
        let frames: Vec<_> = zmq.iter().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), b"Test.Tag");
        assert_eq!(frames[1].as_ref(), b"payload");
    }

    #[test]
    fn zmq_roundtrip() {
        let envelope = Envelope::pack(&Probe { n: 3 }).unwrap();
        let back = Envelope::from_zmq(&envelope.to_zmq()).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.unpack::<Probe>().unwrap(), Probe { n: 3 });
    }

    #[test]
    fn wrong_frame_count_rejected() {
        let mut zmq = ZmqMessage::from("only-one-frame");
        let err = Envelope::from_zmq(&zmq).unwrap_err();
        assert!(matches!(err, FabricError::FrameCount { actual: 1, .. }));

        zmq.push_back(b"two".to_vec().into());
        zmq.push_back(b"three".to_vec().into());
        let err = Envelope::from_zmq(&zmq).unwrap_err();
        assert!(matches!(err, FabricError::FrameCount { actual: 3, .. }));
    }

    #[test]
    fn tag_mismatch_on_unpack() {
        let envelope = Envelope::new("Test.WrongTag", codec::encode(&Probe { n: 1 }).unwrap());
        assert!(matches!(
            envelope.unpack::<Probe>().unwrap_err(),
            FabricError::TypeMismatch { .. }
        ));
    }
}
