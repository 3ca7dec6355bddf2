//! Tagged SQL values and their canonical encoding.

use std::fmt;

use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_64;

/// Engine-visible value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    Real,
    Text,
    Blob,
    /// Two-column `[key, count]` array produced by the count-histogram
    /// aggregator. The key may be NULL for the suppress bin.
    Histogram,
}

impl ValueType {
    /// Stable lowercase name, used in error messages and explain output.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Real => "real",
            Self::Text => "text",
            Self::Blob => "blob",
            Self::Histogram => "histogram",
        }
    }

    /// Whether values of this type can serve as a summand.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Real)
    }
}

/// One row of a histogram result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramBin {
    /// Generalized bin key; `None` marks the suppress bin.
    pub key: Option<i64>,
    /// Noisy per-bin count.
    pub count: i64,
}

/// A non-NULL SQL value. SQL NULL is represented as `None` in
/// [`NullableValue`] slices.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Histogram(Vec<HistogramBin>),
}

/// A possibly-NULL attribute cell.
pub type NullableValue = Option<Value>;

const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_REAL: u8 = 3;
const TAG_TEXT: u8 = 4;
const TAG_BLOB: u8 = 5;
const TAG_HISTOGRAM: u8 = 6;

impl Value {
    /// The type tag of this value.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Real(_) => ValueType::Real,
            Self::Text(_) => ValueType::Text,
            Self::Blob(_) => ValueType::Blob,
            Self::Histogram(_) => ValueType::Histogram,
        }
    }

    /// Appends the canonical encoding (tag byte + payload bytes) to `out`.
    ///
    /// Floats encode their raw bit pattern, so `-0.0` and `0.0` are distinct
    /// labels and NaN payloads are stable.
    pub fn encode_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Self::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(u8::from(*b));
            }
            Self::Int(i) => {
                out.push(TAG_INT);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Self::Real(r) => {
                out.push(TAG_REAL);
                out.extend_from_slice(&r.to_bits().to_le_bytes());
            }
            Self::Text(s) => {
                out.push(TAG_TEXT);
                out.extend_from_slice(s.as_bytes());
            }
            Self::Blob(b) => {
                out.push(TAG_BLOB);
                out.extend_from_slice(b);
            }
            Self::Histogram(bins) => {
                out.push(TAG_HISTOGRAM);
                for bin in bins {
                    match bin.key {
                        Some(key) => {
                            out.push(1);
                            out.extend_from_slice(&key.to_le_bytes());
                        }
                        None => out.push(0),
                    }
                    out.extend_from_slice(&bin.count.to_le_bytes());
                }
            }
        }
    }

    /// The canonical encoding as an owned small buffer.
    #[must_use]
    pub fn canonical_bytes(&self) -> SmallVec<[u8; 24]> {
        let mut out = Vec::with_capacity(16);
        self.encode_canonical(&mut out);
        SmallVec::from_vec(out)
    }

    /// 64-bit hash of the canonical encoding.
    #[must_use]
    pub fn hash64(&self) -> u64 {
        let mut out = Vec::with_capacity(16);
        self.encode_canonical(&mut out);
        xxh3_64(&out)
    }

    /// Bit-level equality through the canonical encoding. Label grouping and
    /// sibling matching use this rather than `PartialEq`, which follows IEEE
    /// float semantics.
    #[must_use]
    pub fn bits_eq(&self, other: &Self) -> bool {
        self.canonical_bytes() == other.canonical_bytes()
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(r) => Some(*r),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
            Self::Blob(bytes) => {
                f.write_str("\\x")?;
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Self::Histogram(bins) => {
                f.write_str("[")?;
                for (index, bin) in bins.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    match bin.key {
                        Some(key) => write!(f, "[{key},{}]", bin.count)?,
                        None => write!(f, "[null,{}]", bin.count)?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}
