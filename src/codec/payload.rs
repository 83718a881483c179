//! Typed payloads carried over the sideband stream.
//!
//! A [`TypedPayload`] is a tag plus a vector of one primitive element type.
//! The tag is serialized with the values, so the receiver reconstructs the
//! concrete shape without any schema exchange. Decoding is a tag dispatch
//! through the [`Element`] trait.
//!
//! # Example
//!
//! ```
//! use moniker_sideband::codec::TypedPayload;
//!
//! let payload = TypedPayload::from(vec![1i64, 1, 1, 1]);
//! assert_eq!(payload.len(), 4);
//! assert_eq!(payload.as_slice::<i64>(), Some(&[1i64, 1, 1, 1][..]));
//! assert!(payload.as_slice::<f64>().is_none());
//! ```

use serde::{Deserialize, Serialize};

use crate::moniker::{DataShape, ElementType, Extent};

/// One slot of a sideband batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedPayload {
    F64(Vec<f64>),
    F32(Vec<f32>),
    I64(Vec<i64>),
    I32(Vec<i32>),
    I16(Vec<i16>),
    U64(Vec<u64>),
    U32(Vec<u32>),
    U16(Vec<u16>),
    U8(Vec<u8>),
}

/// Primitive types that can live in a [`TypedPayload`].
pub trait Element: Copy + Sized + 'static {
    const TYPE: ElementType;

    /// Borrow the values if `payload` carries this element type.
    fn slice(payload: &TypedPayload) -> Option<&[Self]>;

    /// Wrap values in the matching payload variant.
    fn wrap(values: Vec<Self>) -> TypedPayload;

    /// Lossy conversion used when a remote casts between element types.
    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const TYPE: ElementType = ElementType::$variant;

            #[inline]
            fn slice(payload: &TypedPayload) -> Option<&[Self]> {
                match payload {
                    TypedPayload::$variant(values) => Some(values),
                    _ => None,
                }
            }

            #[inline]
            fn wrap(values: Vec<Self>) -> TypedPayload {
                TypedPayload::$variant(values)
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
        }

        impl From<Vec<$ty>> for TypedPayload {
            fn from(values: Vec<$ty>) -> Self {
                TypedPayload::$variant(values)
            }
        }
    };
}

impl_element!(f64, F64);
impl_element!(f32, F32);
impl_element!(i64, I64);
impl_element!(i32, I32);
impl_element!(i16, I16);
impl_element!(u64, U64);
impl_element!(u32, U32);
impl_element!(u16, U16);
impl_element!(u8, U8);

impl TypedPayload {
    /// A single-value payload.
    pub fn scalar<T: Element>(value: T) -> Self {
        T::wrap(vec![value])
    }

    /// A zero-filled payload of the given shape.
    pub fn zeroed(shape: DataShape) -> Self {
        Self::from_f64_values(shape.element, std::iter::repeat(0.0).take(shape.len()))
    }

    /// Build a payload of `element` type from `f64` values, casting each.
    pub fn from_f64_values(element: ElementType, values: impl IntoIterator<Item = f64>) -> Self {
        fn cast<T: Element>(values: impl IntoIterator<Item = f64>) -> TypedPayload {
            T::wrap(values.into_iter().map(T::from_f64).collect())
        }
        match element {
            ElementType::F64 => cast::<f64>(values),
            ElementType::F32 => cast::<f32>(values),
            ElementType::I64 => cast::<i64>(values),
            ElementType::I32 => cast::<i32>(values),
            ElementType::I16 => cast::<i16>(values),
            ElementType::U64 => cast::<u64>(values),
            ElementType::U32 => cast::<u32>(values),
            ElementType::U16 => cast::<u16>(values),
            ElementType::U8 => cast::<u8>(values),
        }
    }

    /// Values widened to `f64`.
    pub fn to_f64_values(&self) -> Vec<f64> {
        fn widen<T: Element>(values: &[T]) -> Vec<f64> {
            values.iter().map(|v| v.to_f64()).collect()
        }
        match self {
            TypedPayload::F64(v) => v.clone(),
            TypedPayload::F32(v) => widen(v),
            TypedPayload::I64(v) => widen(v),
            TypedPayload::I32(v) => widen(v),
            TypedPayload::I16(v) => widen(v),
            TypedPayload::U64(v) => widen(v),
            TypedPayload::U32(v) => widen(v),
            TypedPayload::U16(v) => widen(v),
            TypedPayload::U8(v) => widen(v),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            TypedPayload::F64(_) => ElementType::F64,
            TypedPayload::F32(_) => ElementType::F32,
            TypedPayload::I64(_) => ElementType::I64,
            TypedPayload::I32(_) => ElementType::I32,
            TypedPayload::I16(_) => ElementType::I16,
            TypedPayload::U64(_) => ElementType::U64,
            TypedPayload::U32(_) => ElementType::U32,
            TypedPayload::U16(_) => ElementType::U16,
            TypedPayload::U8(_) => ElementType::U8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TypedPayload::F64(v) => v.len(),
            TypedPayload::F32(v) => v.len(),
            TypedPayload::I64(v) => v.len(),
            TypedPayload::I32(v) => v.len(),
            TypedPayload::I16(v) => v.len(),
            TypedPayload::U64(v) => v.len(),
            TypedPayload::U32(v) => v.len(),
            TypedPayload::U16(v) => v.len(),
            TypedPayload::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape this payload would satisfy if bound to an array slot.
    pub fn shape(&self) -> DataShape {
        DataShape::array(self.element_type(), self.len())
    }

    /// Whether this payload fits a slot of `shape`.
    ///
    /// Element types must match exactly; scalar slots take exactly one value.
    pub fn matches(&self, shape: &DataShape) -> bool {
        if self.element_type() != shape.element {
            return false;
        }
        match shape.extent {
            Extent::Scalar => self.len() == 1,
            Extent::Array(n) => self.len() == n,
        }
    }

    /// Typed view of the values, `None` on tag mismatch.
    #[inline]
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::slice(self)
    }
}

/// Body of a `WRITE` or `READ` frame: one payload per moniker, in set order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SidebandValues {
    pub values: Vec<TypedPayload>,
}

impl SidebandValues {
    pub fn new(values: Vec<TypedPayload>) -> Self {
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;

    #[test]
    fn test_tag_dispatch() {
        let payload = TypedPayload::from(vec![1.5f64, 2.5]);
        assert_eq!(payload.element_type(), ElementType::F64);
        assert_eq!(payload.as_slice::<f64>(), Some(&[1.5, 2.5][..]));
        assert!(payload.as_slice::<f32>().is_none());
        assert!(payload.as_slice::<i64>().is_none());
    }

    #[test]
    fn test_matches_scalar_and_array() {
        let scalar = TypedPayload::scalar(1.0f64);
        assert!(scalar.matches(&DataShape::scalar(ElementType::F64)));
        assert!(scalar.matches(&DataShape::array(ElementType::F64, 1)));
        assert!(!scalar.matches(&DataShape::scalar(ElementType::F32)));

        let array = TypedPayload::from(vec![1i64; 8]);
        assert!(array.matches(&DataShape::array(ElementType::I64, 8)));
        assert!(!array.matches(&DataShape::array(ElementType::I64, 4)));
        assert!(!array.matches(&DataShape::scalar(ElementType::I64)));
    }

    #[test]
    fn test_cast_between_types() {
        let payload = TypedPayload::from_f64_values(ElementType::I16, vec![1.9, -2.0, 3.0]);
        assert_eq!(payload.as_slice::<i16>(), Some(&[1i16, -2, 3][..]));
        assert_eq!(payload.to_f64_values(), vec![1.0, -2.0, 3.0]);
    }

    #[test]
    fn test_zeroed() {
        let payload = TypedPayload::zeroed(DataShape::array(ElementType::U8, 3));
        assert_eq!(payload, TypedPayload::U8(vec![0, 0, 0]));
        assert!(payload.matches(&DataShape::array(ElementType::U8, 3)));
    }

    #[test]
    fn test_msgpack_keeps_tag() {
        let values = SidebandValues::new(vec![
            TypedPayload::from(vec![1.0f64]),
            TypedPayload::from(vec![1i64, 2, 3, 4]),
            TypedPayload::from(vec![255u8, 0]),
        ]);

        let encoded = MsgPackCodec::encode(&values).unwrap();
        let decoded: SidebandValues = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, values);
        assert_eq!(decoded.values[1].element_type(), ElementType::I64);
    }
}
