//! Common types used across storage operations.

use bytes::Bytes;

/// Key-value pair returned from prefix scans.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use keyward_storage::KeyValue;
///
/// let kv = KeyValue::new(Bytes::from("refresh-tokens/abc"), Bytes::from("{}"));
/// assert_eq!(kv.key, Bytes::from("refresh-tokens/abc"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// Macro to define a newtype wrapper around `i64` with standard trait
/// implementations.
///
/// Each generated type:
/// - Is a transparent wrapper around `i64` (zero runtime cost)
/// - Derives `Copy`, `Clone`, `Debug`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Derives `Serialize` and `Deserialize` (transparent)
/// - Implements `From<i64>` and `Into<i64>`
/// - Implements `Display` that outputs the inner value
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Local account identifier.
    ///
    /// Wraps the account store's primary key so an account id cannot be
    /// confused with any other integer (a counter, a timestamp).
    ///
    /// # Examples
    ///
    /// ```
    /// use keyward_storage::AccountId;
    ///
    /// let id = AccountId::from(42);
    /// assert_eq!(i64::from(id), 42);
    /// assert_eq!(id.to_string(), "42");
    /// ```
    AccountId
);

impl AccountId {
    /// Fixed-width rendering used inside storage keys so that lexical key
    /// order matches numeric id order.
    ///
    /// The id is biased by flipping its sign bit, which maps the whole `i64`
    /// range onto `u64` in order. Negative ids therefore keep the same width
    /// and sort before every non-negative id.
    #[must_use]
    pub fn storage_segment(&self) -> String {
        let biased = u64::from_be_bytes(self.0.to_be_bytes()) ^ (1 << 63);
        format!("{biased:020}")
    }
}
