use std::fmt;

// ElemKind / Element — numeric types a reader can emit
//
// The reader is generic over its output element type. Only the two float
// widths a training loop consumes are supported:
//
//   F32 — the default workhorse
//   F64 — for high-precision work
//
// The kind tag is persisted in cache files, so a cache built for one width
// is never replayed into buffers of the other.

/// Runtime tag for an [`Element`] type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemKind {
    F32,
    F64,
}

impl ElemKind {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            ElemKind::F32 => 4,
            ElemKind::F64 => 8,
        }
    }

    /// Stable one-byte encoding used by the cache format.
    pub fn to_u8(self) -> u8 {
        match self {
            ElemKind::F32 => 0,
            ElemKind::F64 => 1,
        }
    }

    pub fn from_u8(v: u8) -> crate::Result<Self> {
        match v {
            0 => Ok(ElemKind::F32),
            1 => Ok(ElemKind::F64),
            _ => Err(crate::Error::CacheFormat(format!(
                "unknown element tag: {v}"
            ))),
        }
    }
}

impl fmt::Display for ElemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElemKind::F32 => "f32",
            ElemKind::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

/// Trait implemented by Rust types that can be stored in an output buffer.
///
/// Provides the mapping between the concrete Rust type and [`ElemKind`],
/// conversions from the parser's `f64` values, and an exact little-endian
/// byte encoding for the cache.
pub trait Element:
    Copy + Send + Sync + PartialEq + 'static + num_traits::Zero + num_traits::One + fmt::Debug
{
    /// The corresponding kind tag.
    const KIND: ElemKind;

    fn to_f64(self) -> f64;

    fn from_f64(v: f64) -> Self;

    /// Append the little-endian bytes of `self` to `out`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode one value from exactly `KIND.size_in_bytes()` bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

impl Element for f32 {
    const KIND: ElemKind = ElemKind::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl Element for f64 {
    const KIND: ElemKind = ElemKind::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn read_le(bytes: &[u8]) -> Self {
        f64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ])
    }
}
