//! Record-set digests for result verification.
//!
//! Hosts and test harnesses compare two query results by digesting every
//! record into one SHA-256 value. The digest is sequential, so it checks
//! both content and emission order; it is a diagnostic, not an anonymizing
//! aggregator, and takes no part in the dispatch table.

use sha2::{Digest, Sha256};
use veilql_types::Value;

/// Streaming SHA-256 over record encodings.
#[derive(Debug, Clone, Default)]
pub struct RecordHasher {
    hasher: Sha256,
}

/// Digest width in bytes.
pub const RECORD_HASH_SIZE: usize = 32;

impl RecordHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one record into the digest. NULL cells carry their own marker
    /// so `[NULL, 1]` and `[1, NULL]` digest differently.
    pub fn update(&mut self, record: &[Option<Value>]) {
        let mut encoded = Vec::with_capacity(record.len() * 12);
        for cell in record {
            match cell {
                Some(value) => {
                    encoded.push(1);
                    value.encode_canonical(&mut encoded);
                }
                None => encoded.push(0),
            }
            encoded.push(0xfe);
        }
        self.hasher.update(&(encoded.len() as u64).to_le_bytes());
        self.hasher.update(&encoded);
    }

    /// The digest over everything fed so far.
    #[must_use]
    pub fn finalize(self) -> [u8; RECORD_HASH_SIZE] {
        self.hasher.finalize().into()
    }

    /// The digest rendered as lowercase hex.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        self.finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}
