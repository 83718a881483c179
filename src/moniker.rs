//! Monikers and moniker groups.
//!
//! A [`Moniker`] is the opaque handle a remote service returns from a
//! "begin read" or "begin write" call. It names one pending operation bound to
//! one resource and one [`DataShape`]. Monikers are move-only: handing one to a
//! [`MonikerGroup`] (and the group to negotiation) consumes it, so the same
//! pending operation cannot be registered twice.
//!
//! # Example
//!
//! ```
//! use moniker_sideband::moniker::{DataShape, ElementType, Moniker, MonikerGroup};
//!
//! let read = Moniker::from_remote("localhost:31763", 1, DataShape::scalar(ElementType::F64));
//! let write = Moniker::from_remote("localhost:31763", 2, DataShape::scalar(ElementType::F64));
//!
//! let mut group = MonikerGroup::new();
//! group.add_read(read).unwrap();
//! group.add_write(write).unwrap();
//!
//! let layout = group.layout();
//! assert_eq!(layout.read_len(), 1);
//! assert_eq!(layout.write_len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SidebandError};

/// Primitive element type of a typed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F64,
    F32,
    I64,
    I32,
    I16,
    U64,
    U32,
    U16,
    U8,
}

impl ElementType {
    pub fn name(self) -> &'static str {
        match self {
            ElementType::F64 => "f64",
            ElementType::F32 => "f32",
            ElementType::I64 => "i64",
            ElementType::I32 => "i32",
            ElementType::I16 => "i16",
            ElementType::U64 => "u64",
            ElementType::U32 => "u32",
            ElementType::U16 => "u16",
            ElementType::U8 => "u8",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scalar or fixed-size array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extent {
    Scalar,
    Array(usize),
}

/// Element type plus extent of the data bound to a moniker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataShape {
    pub element: ElementType,
    pub extent: Extent,
}

impl DataShape {
    pub const fn scalar(element: ElementType) -> Self {
        Self {
            element,
            extent: Extent::Scalar,
        }
    }

    pub const fn array(element: ElementType, len: usize) -> Self {
        Self {
            element,
            extent: Extent::Array(len),
        }
    }

    /// Number of elements a payload of this shape carries.
    #[inline]
    pub fn len(&self) -> usize {
        match self.extent {
            Extent::Scalar => 1,
            Extent::Array(n) => n,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for DataShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.extent {
            Extent::Scalar => write!(f, "scalar {}", self.element),
            Extent::Array(n) => write!(f, "{}[{}]", self.element, n),
        }
    }
}

/// Opaque handle naming one pending read or write operation.
///
/// Deliberately not `Clone`: a moniker is consumed exactly once by
/// negotiation.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moniker {
    service_location: String,
    data_instance: u64,
    shape: DataShape,
}

impl Moniker {
    /// Construct a moniker as assigned by a remote service.
    ///
    /// Clients obtain monikers from `begin_read`/`begin_write`; this
    /// constructor is for service implementations.
    pub fn from_remote(service_location: impl Into<String>, data_instance: u64, shape: DataShape) -> Self {
        Self {
            service_location: service_location.into(),
            data_instance,
            shape,
        }
    }

    /// Service that issued this moniker.
    pub fn service_location(&self) -> &str {
        &self.service_location
    }

    /// Instance number assigned by the service.
    pub fn data_instance(&self) -> u64 {
        self.data_instance
    }

    /// Shape of the data bound to this moniker.
    pub fn shape(&self) -> DataShape {
        self.shape
    }

    fn key(&self) -> (&str, u64) {
        (&self.service_location, self.data_instance)
    }
}

impl fmt::Display for Moniker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.service_location, self.data_instance)
    }
}

/// Read set and write set for one session.
///
/// Order within each set is load-bearing: slot `i` of every streamed batch
/// belongs to the `i`-th moniker of that set.
#[derive(Debug, Default)]
pub struct MonikerGroup {
    read: Vec<Moniker>,
    write: Vec<Moniker>,
}

impl MonikerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a moniker to the read set.
    pub fn add_read(&mut self, moniker: Moniker) -> Result<&mut Self> {
        self.check_unique(&moniker)?;
        self.read.push(moniker);
        Ok(self)
    }

    /// Append a moniker to the write set.
    pub fn add_write(&mut self, moniker: Moniker) -> Result<&mut Self> {
        self.check_unique(&moniker)?;
        self.write.push(moniker);
        Ok(self)
    }

    fn check_unique(&self, moniker: &Moniker) -> Result<()> {
        let key = moniker.key();
        if self.read.iter().chain(&self.write).any(|m| m.key() == key) {
            return Err(SidebandError::DuplicateMoniker(moniker.to_string()));
        }
        Ok(())
    }

    pub fn read_monikers(&self) -> &[Moniker] {
        &self.read
    }

    pub fn write_monikers(&self) -> &[Moniker] {
        &self.write
    }

    /// True for the degenerate no-data session.
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }

    /// Slot shapes of both sets, in set order.
    pub fn layout(&self) -> SlotLayout {
        SlotLayout {
            read: self.read.iter().map(Moniker::shape).collect(),
            write: self.write.iter().map(Moniker::shape).collect(),
        }
    }

    /// Split into `(read, write)`, consuming the group.
    pub fn into_parts(self) -> (Vec<Moniker>, Vec<Moniker>) {
        (self.read, self.write)
    }
}

/// Immutable slot shapes fixed at negotiation.
///
/// Cheap to clone and safe to share between observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLayout {
    read: Arc<[DataShape]>,
    write: Arc<[DataShape]>,
}

impl SlotLayout {
    pub fn new(read: Vec<DataShape>, write: Vec<DataShape>) -> Self {
        Self {
            read: read.into(),
            write: write.into(),
        }
    }

    pub fn read(&self) -> &[DataShape] {
        &self.read
    }

    pub fn write(&self) -> &[DataShape] {
        &self.write
    }

    pub fn read_len(&self) -> usize {
        self.read.len()
    }

    pub fn write_len(&self) -> usize {
        self.write.len()
    }
}
