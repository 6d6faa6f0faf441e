// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Prefixed, time-ordered identifiers.
//!
//! Identifiers travel as text (`"BU"` + hyphenated UUIDv7) and are stored as
//! fixed-width binary: the prefix bytes followed by the 16 UUID bytes. UUIDv7
//! puts the millisecond timestamp in the leading bytes, so binary order is
//! creation order and the primary key index stays append-mostly.
//!
//! A codec only accepts identifiers carrying its own prefix. The UUID part is
//! parsed in any form the `uuid` crate accepts and always comes back as
//! lowercase hyphenated text, so `"BU0190A7B2-..."` is stored and returned as
//! `"BU0190a7b2-..."`.
//!
//! ```
//! use modelbase::{IdCodec, OrderedUuid};
//!
//! let codec = OrderedUuid::new("BU");
//! let id = codec.generate();
//! let stored = codec.encode(&id).unwrap();
//! assert_eq!(stored.len(), 18);
//! assert_eq!(codec.decode(&stored).unwrap(), id);
//! ```

use std::fmt::Debug;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier '{0}' is too short for a {1}-character prefix")]
    TooShort(String, usize),
    #[error("identifier '{0}' has an invalid prefix")]
    InvalidPrefix(String),
    #[error("identifier '{id}' does not start with '{expected}'")]
    WrongPrefix { id: String, expected: String },
    #[error("identifier '{0}' does not contain a valid uuid")]
    InvalidUuid(String),
    #[error("stored identifier has {actual} bytes, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Conversion between the external (text) and stored (binary) forms of an
/// identifier column.
pub trait IdCodec: Send + Sync + Debug {
    fn encode(&self, id: &str) -> Result<Vec<u8>, IdError>;
    fn decode(&self, bytes: &[u8]) -> Result<String, IdError>;
    /// A fresh identifier in external form.
    fn generate(&self) -> String;
}

/// Prefix + UUIDv7 codec.
#[derive(Debug, Clone)]
pub struct OrderedUuid {
    prefix: String,
}

impl OrderedUuid {
    /// `prefix` must be ASCII; its length fixes the stored width.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Stored width in bytes.
    #[must_use]
    pub fn width(&self) -> usize {
        self.prefix.len() + 16
    }
}

impl IdCodec for OrderedUuid {
    fn encode(&self, id: &str) -> Result<Vec<u8>, IdError> {
        let prefix_len = self.prefix.len();
        if id.len() <= prefix_len {
            return Err(IdError::TooShort(id.to_string(), prefix_len));
        }
        if !id.is_char_boundary(prefix_len) {
            return Err(IdError::InvalidPrefix(id.to_string()));
        }
        let (prefix, rest) = id.split_at(prefix_len);
        if prefix != self.prefix {
            return Err(IdError::WrongPrefix {
                id: id.to_string(),
                expected: self.prefix.clone(),
            });
        }
        let uuid = Uuid::parse_str(rest).map_err(|_| IdError::InvalidUuid(id.to_string()))?;

        let mut bytes = Vec::with_capacity(self.width());
        bytes.extend_from_slice(prefix.as_bytes());
        bytes.extend_from_slice(uuid.as_bytes());
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, IdError> {
        if bytes.len() != self.width() {
            return Err(IdError::InvalidLength {
                expected: self.width(),
                actual: bytes.len(),
            });
        }
        let (prefix, raw) = bytes.split_at(self.prefix.len());
        let prefix = std::str::from_utf8(prefix)
            .map_err(|_| IdError::InvalidPrefix(hex::encode(bytes)))?;
        let uuid = Uuid::from_slice(raw).map_err(|_| IdError::InvalidUuid(hex::encode(bytes)))?;
        Ok(format!("{}{}", prefix, uuid.hyphenated()))
    }

    fn generate(&self) -> String {
        format!("{}{}", self.prefix, Uuid::now_v7().hyphenated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let codec = OrderedUuid::new("BU");
        let id = "BU0190a7b2-6c1e-7d4f-9a2b-3c4d5e6f7a8b";
        let bytes = codec.encode(id).unwrap();
        assert_eq!(&bytes[..2], b"BU");
        assert_eq!(bytes.len(), 18);
        assert_eq!(codec.decode(&bytes).unwrap(), id);
    }

    #[test]
    fn test_simple_uuid_form_normalizes_to_hyphenated() {
        let codec = OrderedUuid::new("EX");
        let bytes = codec.encode("EX0190a7b26c1e7d4f9a2b3c4d5e6f7a8b").unwrap();
        assert_eq!(
            codec.decode(&bytes).unwrap(),
            "EX0190a7b2-6c1e-7d4f-9a2b-3c4d5e6f7a8b"
        );
    }

    #[test]
    fn test_rejects_another_tables_prefix() {
        let budgets = OrderedUuid::new("BU");
        let expense = OrderedUuid::new("EX").generate();

        let err = budgets.encode(&expense).unwrap_err();
        assert_eq!(
            err,
            IdError::WrongPrefix {
                id: expense.clone(),
                expected: "BU".to_string(),
            }
        );
        assert!(budgets.encode(&format!("bu{}", &expense[2..])).is_err());
    }

    #[test]
    fn test_uppercase_uuid_comes_back_lowercase() {
        let codec = OrderedUuid::new("BU");
        let bytes = codec.encode("BU0190A7B2-6C1E-7D4F-9A2B-3C4D5E6F7A8B").unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), "BU0190a7b2-6c1e-7d4f-9a2b-3c4d5e6f7a8b");
    }

    #[test]
    fn test_generated_ids_sort_by_creation() {
        let codec = OrderedUuid::new("BU");
        let first = codec.encode(&codec.generate()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = codec.encode(&codec.generate()).unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_rejects_garbage() {
        let codec = OrderedUuid::new("BU");
        assert!(matches!(codec.encode("BU"), Err(IdError::TooShort(..))));
        assert!(matches!(codec.encode("BUnot-a-uuid"), Err(IdError::InvalidUuid(_))));
        assert!(matches!(
            codec.encode("B-0190a7b2-6c1e-7d4f-9a2b-3c4d5e6f7a8b"),
            Err(IdError::WrongPrefix { .. })
        ));
        assert!(matches!(codec.encode("Bé0190a7b2-6c1e-7d4f-9a2b-3c4d5e6f7a8b"), Err(IdError::InvalidPrefix(_))));
        assert!(matches!(
            codec.decode(&[1, 2, 3]),
            Err(IdError::InvalidLength { expected: 18, actual: 3 })
        ));
    }
}
