//! Typed identifiers carried by protocol messages.

use crate::{NetworkError, NetworkResult};
use std::fmt;
use std::str::FromStr;

/// Length of every digest identifier on the wire.
pub const DIGEST_LENGTH: usize = 32;

macro_rules! digest_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; DIGEST_LENGTH]);

        impl $name {
            /// Build from a slice, failing unless it is exactly 32 bytes.
            pub fn from_slice(bytes: &[u8]) -> NetworkResult<Self> {
                let arr: [u8; DIGEST_LENGTH] = bytes.try_into().map_err(|_| {
                    NetworkError::InvalidId(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($name),
                        DIGEST_LENGTH,
                        bytes.len()
                    ))
                })?;
                Ok(Self(arr))
            }

            pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
                &self.0
            }
        }

        impl From<[u8; DIGEST_LENGTH]> for $name {
            fn from(bytes: [u8; DIGEST_LENGTH]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = NetworkError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s).map_err(|e| NetworkError::InvalidId(e.to_string()))?;
                Self::from_slice(&bytes)
            }
        }
    };
}

digest_id!(
    /// Content identifier of a block section or transaction.
    ModifierId
);

digest_id!(
    /// Digest of a UTXO snapshot manifest (root of the sliced tree).
    ManifestId
);

digest_id!(
    /// Digest of one subtree chunk referenced by a manifest.
    SubtreeId
);

/// Kind of network object carried by Inv, RequestModifier and Modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkObjectTypeId(pub u8);

impl NetworkObjectTypeId {
    pub const TRANSACTION: Self = Self(2);
    pub const HEADER: Self = Self(101);
    pub const BLOCK_TRANSACTIONS: Self = Self(102);
    pub const AD_PROOFS: Self = Self(104);
    pub const EXTENSION: Self = Self(108);

    /// Human readable name for logging.
    pub fn name(&self) -> &'static str {
        match *self {
            Self::TRANSACTION => "Transaction",
            Self::HEADER => "Header",
            Self::BLOCK_TRANSACTIONS => "BlockTransactions",
            Self::AD_PROOFS => "ADProofs",
            Self::EXTENSION => "Extension",
            _ => "Unknown",
        }
    }

    /// Whether the object is a block section rather than a mempool transaction.
    pub fn is_block_section(&self) -> bool {
        self.0 > 50
    }
}

impl fmt::Display for NetworkObjectTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_length_validated() {
        assert!(ModifierId::from_slice(&[0u8; 31]).is_err());
        assert!(ModifierId::from_slice(&[0u8; 33]).is_err());
        assert_eq!(ModifierId::from_slice(&[7u8; 32]).unwrap(), ModifierId([7u8; 32]));
    }

    #[test]
    fn test_hex_display_and_parse() {
        let id = ManifestId([0xAB; 32]);
        let s = id.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(s.parse::<ManifestId>().unwrap(), id);
        assert!("zz".parse::<SubtreeId>().is_err());
        assert!("abcd".parse::<SubtreeId>().is_err());
    }

    #[test]
    fn test_object_type_names() {
        assert_eq!(NetworkObjectTypeId::HEADER.name(), "Header");
        assert_eq!(NetworkObjectTypeId(77).name(), "Unknown");
        assert!(NetworkObjectTypeId::EXTENSION.is_block_section());
        assert!(!NetworkObjectTypeId::TRANSACTION.is_block_section());
    }
}
