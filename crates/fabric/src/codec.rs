//! Body codec and the process-wide message registry.
//!
//! Every message body on the wire is a CBOR map carrying two invariant
//! fields, `MessageType` (must equal the registered tag) and
//! `MessageVersion`, alongside the per-type payload fields. A JSON
//! variant of the codec exists for debugging only.
//!
//! The [`CodecRegistry`] maps type tags to decoders so that receive-style
//! sockets without a typed handler can still produce typed values. It is
//! built once at program start and cloned by reference into every socket
//! that needs it; registering the same tag twice is an error.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::FabricError;

/// A typed message format with a stable wire identity.
///
/// Implementors get CBOR/JSON encoding for free via [`encode`] and
/// [`decode`]. `TYPE_TAG` is a stable domain-dotted identifier; `VERSION`
/// is a semver string checked for major-version compatibility on decode.
pub trait MessageFormat:
    Serialize + DeserializeOwned + Default + Send + Sync + 'static
{
    const TYPE_TAG: &'static str;
    const VERSION: &'static str = "1.0.0";
}

/// Object-safe view of a decoded message, for registry-driven receive
/// paths that cannot name the concrete type.
pub trait AnyMessage: Send + Sync {
    fn type_tag(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

impl<M: MessageFormat> AnyMessage for M {
    fn type_tag(&self) -> &'static str {
        M::TYPE_TAG
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AnyMessage {
    /// Downcast to a concrete message format.
    pub fn downcast_ref<M: MessageFormat>(&self) -> Option<&M> {
        self.as_any().downcast_ref()
    }
}

/// Wire shape shared by every message body: the invariant header fields
/// plus the per-type payload, flattened into one CBOR/JSON map.
#[derive(Serialize, Deserialize)]
struct WireBody<T> {
    #[serde(rename = "MessageType")]
    message_type: String,
    #[serde(rename = "MessageVersion")]
    message_version: String,
    #[serde(flatten)]
    payload: T,
}

/// Encode a message body as CBOR (the production codec).
pub fn encode<M: MessageFormat>(message: &M) -> Result<Vec<u8>, FabricError> {
    let wire = WireBody {
        message_type: M::TYPE_TAG.to_string(),
        message_version: M::VERSION.to_string(),
        payload: message,
    };
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(&wire, &mut buffer)
        .map_err(|e| FabricError::encode(M::TYPE_TAG, e))?;
    Ok(buffer)
}

/// Decode a CBOR message body, verifying the invariant fields.
pub fn decode<M: MessageFormat>(body: &[u8]) -> Result<M, FabricError> {
    let wire: WireBody<M> = ciborium::de::from_reader(body)
        .map_err(|e| FabricError::decode(M::TYPE_TAG, e))?;
    check_header::<M>(&wire.message_type, &wire.message_version)?;
    Ok(wire.payload)
}

/// Encode a message body as JSON. Debugging only; the wire codec is CBOR.
pub fn encode_json<M: MessageFormat>(message: &M) -> Result<Vec<u8>, FabricError> {
    let wire = WireBody {
        message_type: M::TYPE_TAG.to_string(),
        message_version: M::VERSION.to_string(),
        payload: message,
    };
    serde_json::to_vec(&wire).map_err(|e| FabricError::encode(M::TYPE_TAG, e))
}

/// Decode a JSON message body. Debugging only.
pub fn decode_json<M: MessageFormat>(body: &[u8]) -> Result<M, FabricError> {
    let wire: WireBody<M> =
        serde_json::from_slice(body).map_err(|e| FabricError::decode(M::TYPE_TAG, e))?;
    check_header::<M>(&wire.message_type, &wire.message_version)?;
    Ok(wire.payload)
}

fn check_header<M: MessageFormat>(tag: &str, version: &str) -> Result<(), FabricError> {
    if tag != M::TYPE_TAG {
        return Err(FabricError::TypeMismatch {
            expected: M::TYPE_TAG.to_string(),
            actual: tag.to_string(),
        });
    }
    let major = |v: &str| v.split('.').next().map(str::to_string);
    if major(version) != major(M::VERSION) {
        return Err(FabricError::decode(
            M::TYPE_TAG,
            format!(
                "incompatible message version {version}, expected {}",
                M::VERSION
            ),
        ));
    }
    Ok(())
}

/// Type-erased encode/decode pair plus blank constructor for one tag.
trait Codec: Send + Sync {
    fn type_tag(&self) -> &'static str;
    fn decode(&self, body: &[u8]) -> Result<Box<dyn AnyMessage>, FabricError>;
    fn blank(&self) -> Box<dyn AnyMessage>;
}

struct TypedCodec<M>(PhantomData<fn() -> M>);

impl<M: MessageFormat> Codec for TypedCodec<M> {
    fn type_tag(&self) -> &'static str {
        M::TYPE_TAG
    }

    fn decode(&self, body: &[u8]) -> Result<Box<dyn AnyMessage>, FabricError> {
        Ok(Box::new(decode::<M>(body)?))
    }

    fn blank(&self) -> Box<dyn AnyMessage> {
        Box::new(M::default())
    }
}

/// Process-wide mapping from type tag to codec.
///
/// Built once on program start, immutable thereafter, and shared by
/// `Arc` into every socket that decodes without a typed handler.
#[derive(Default, Clone)]
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message format. Fails if the tag is already taken.
    pub fn register<M: MessageFormat>(&mut self) -> Result<(), FabricError> {
        if self.codecs.contains_key(M::TYPE_TAG) {
            return Err(FabricError::DuplicateCodec(M::TYPE_TAG.to_string()));
        }
        self.codecs
            .insert(M::TYPE_TAG, Arc::new(TypedCodec::<M>(PhantomData)));
        Ok(())
    }

    /// True if a codec is registered for the tag.
    pub fn contains(&self, type_tag: &str) -> bool {
        self.codecs.contains_key(type_tag)
    }

    /// Decode a body by its wire tag.
    pub fn decode(&self, type_tag: &str, body: &[u8]) -> Result<Box<dyn AnyMessage>, FabricError> {
        let codec = self
            .codecs
            .get(type_tag)
            .ok_or_else(|| FabricError::UnknownType(type_tag.to_string()))?;
        codec.decode(body)
    }

    /// Produce a freshly initialized empty value for the tag.
    pub fn blank(&self, type_tag: &str) -> Result<Box<dyn AnyMessage>, FabricError> {
        let codec = self
            .codecs
            .get(type_tag)
            .ok_or_else(|| FabricError::UnknownType(type_tag.to_string()))?;
        Ok(codec.blank())
    }

    /// The registered tags, for diagnostics.
    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.codecs.keys().copied()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("tags", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Probe {
        value: u64,
        label: String,
    }

    impl MessageFormat for Probe {
        const TYPE_TAG: &'static str = "Test.Probe";
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Other {
        flag: bool,
    }

    impl MessageFormat for Other {
        const TYPE_TAG: &'static str = "Test.Other";
    }

    #[test]
    fn cbor_roundtrip() {
        let m = Probe {
            value: 42,
            label: "hello".into(),
        };
        let bytes = encode(&m).unwrap();
        let back: Probe = decode(&bytes).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn json_roundtrip() {
        let m = Probe {
            value: 7,
            label: "debug".into(),
        };
        let bytes = encode_json(&m).unwrap();
        let back: Probe = decode_json(&bytes).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn json_carries_invariant_fields() {
        let bytes = encode_json(&Probe::default()).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["MessageType"], "Test.Probe");
        assert_eq!(v["MessageVersion"], "1.0.0");
    }

    #[test]
    fn tag_mismatch_rejected() {
        let bytes = encode(&Probe::default()).unwrap();
        let err = decode::<Other>(&bytes).unwrap_err();
        assert!(matches!(err, FabricError::TypeMismatch { .. }));
    }

    #[test]
    fn garbage_body_rejected() {
        assert!(decode::<Probe>(b"\xff\xff\xff").is_err());
    }

    #[test]
    fn registry_decodes_by_tag() {
        let mut registry = CodecRegistry::new();
        registry.register::<Probe>().unwrap();
        registry.register::<Other>().unwrap();

        let bytes = encode(&Probe {
            value: 9,
            label: "x".into(),
        })
        .unwrap();
        let decoded = registry.decode(Probe::TYPE_TAG, &bytes).unwrap();
        let probe = decoded.downcast_ref::<Probe>().unwrap();
        assert_eq!(probe.value, 9);
    }

    #[test]
    fn registry_rejects_duplicate() {
        let mut registry = CodecRegistry::new();
        registry.register::<Probe>().unwrap();
        let err = registry.register::<Probe>().unwrap_err();
        assert!(matches!(err, FabricError::DuplicateCodec(_)));
    }

    #[test]
    fn registry_rejects_unknown_tag() {
        let registry = CodecRegistry::new();
        let err = match registry.decode("Test.Missing", b"") {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, FabricError::UnknownType(_)));
    }

    #[test]
    fn registry_blank_constructor() {
        let mut registry = CodecRegistry::new();
        registry.register::<Probe>().unwrap();
        let blank = registry.blank(Probe::TYPE_TAG).unwrap();
        assert_eq!(blank.downcast_ref::<Probe>().unwrap(), &Probe::default());
    }
}
