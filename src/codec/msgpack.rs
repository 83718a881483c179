//! MsgPack codec using `rmp-serde`.
//!
//! **Always use `to_vec_named`, never `to_vec`.** Sideband bodies are
//! structs ([`SidebandValues`](super::SidebandValues)); named encoding keeps
//! them as maps so a server in any language can read them without knowing our
//! field order.
//!
//! # Example
//!
//! ```
//! use moniker_sideband::codec::{MsgPackCodec, SidebandValues, TypedPayload};
//!
//! let batch = SidebandValues::new(vec![TypedPayload::scalar(1.0f64)]);
//! let encoded = MsgPackCodec::encode(&batch).unwrap();
//! let decoded: SidebandValues = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, batch);
//! ```

use crate::error::Result;

/// MessagePack codec for frame bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        // to_vec_named, NOT to_vec
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{SidebandValues, TypedPayload};

    #[test]
    fn test_values_encode_as_map() {
        let batch = SidebandValues::new(vec![TypedPayload::from(vec![1i64, 1, 1, 1])]);
        let encoded = MsgPackCodec::encode(&batch).unwrap();

        // fixmap with one entry ("values")
        assert_eq!(encoded[0], 0x81, "Expected fixmap, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_empty_batch() {
        let batch = SidebandValues::default();
        let encoded = MsgPackCodec::encode(&batch).unwrap();
        let decoded: SidebandValues = MsgPackCodec::decode(&encoded).unwrap();
        assert!(decoded.values.is_empty());
    }

    #[test]
    fn test_error_text_roundtrip() {
        let encoded = MsgPackCodec::encode(&"unknown session token").unwrap();
        let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, "unknown session token");
    }

    #[test]
    fn test_float_precision_kept() {
        let batch = SidebandValues::new(vec![TypedPayload::from(vec![3.14159f64, -0.5])]);
        let encoded = MsgPackCodec::encode(&batch).unwrap();
        let decoded: SidebandValues = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.values[0].as_slice::<f64>(), Some(&[3.14159, -0.5][..]));
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let invalid = b"not valid msgpack";
        let result: Result<SidebandValues> = MsgPackCodec::decode(invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_tag_type() {
        // A string where a typed payload is expected
        let encoded = MsgPackCodec::encode(&"F64").unwrap();
        let result: Result<TypedPayload> = MsgPackCodec::decode(&encoded);
        assert!(result.is_err());
    }
}
