//! AID extraction: mapping source values to opaque 64-bit hashes.

use veilql_error::{Result, VeilError};
use veilql_noise::hash_bytes;
use veilql_types::{Value, ValueType};

/// An anonymization identifier: an opaque 64-bit hash of the source value.
///
/// Equal source values map to equal AIDs; distinct source values collide
/// only with negligible probability. An AID of 0 is legal.
pub type Aid = u64;

/// Maps a source column value to its [`Aid`].
///
/// The mapper is resolved once per AID argument when an aggregator state is
/// created, so type errors surface before any row is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AidMapper {
    Int,
    Text,
    Blob,
}

impl AidMapper {
    /// Resolves the mapper for an AID argument type.
    pub fn for_type(value_type: ValueType) -> Result<Self> {
        match value_type {
            ValueType::Int => Ok(Self::Int),
            ValueType::Text => Ok(Self::Text),
            ValueType::Blob => Ok(Self::Blob),
            other => Err(VeilError::ArgTypeUnsupported {
                role: "AID",
                type_name: other.name(),
            }),
        }
    }

    /// Hashes a value into its AID.
    #[must_use]
    pub fn map(self, value: &Value) -> Aid {
        match (self, value) {
            (Self::Int, Value::Int(i)) => hash_bytes(&i.to_le_bytes()),
            (Self::Text, Value::Text(s)) => hash_bytes(s.as_bytes()),
            (Self::Blob, Value::Blob(b)) => hash_bytes(b),
            // Executor contract: transition arguments match the declared
            // types. Fall back to the canonical hash if they do not.
            _ => value.hash64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_map_to_equal_aids() {
        let mapper = AidMapper::for_type(ValueType::Text).unwrap();
        assert_eq!(
            mapper.map(&Value::Text("alice".into())),
            mapper.map(&Value::Text("alice".into()))
        );
        assert_ne!(
            mapper.map(&Value::Text("alice".into())),
            mapper.map(&Value::Text("bob".into()))
        );
    }

    #[test]
    fn integer_aids_hash_their_bytes() {
        let mapper = AidMapper::for_type(ValueType::Int).unwrap();
        assert_eq!(mapper.map(&Value::Int(0)), mapper.map(&Value::Int(0)));
        assert_ne!(mapper.map(&Value::Int(1)), mapper.map(&Value::Int(2)));
    }

    #[test]
    fn unsupported_aid_types_are_rejected() {
        for value_type in [ValueType::Real, ValueType::Bool, ValueType::Histogram] {
            let err = AidMapper::for_type(value_type).unwrap_err();
            assert!(
                matches!(err, VeilError::ArgTypeUnsupported { role: "AID", .. }),
                "expected rejection for {value_type:?}"
            );
        }
    }
}
