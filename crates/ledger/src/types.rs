//! Identifier types shared by ledger records.

/// Defines a newtype wrapper around `i64` with the standard trait set.
///
/// Each generated type is `Copy`, orderable, hashable, serializes
/// transparently, and converts to and from `i64`.
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
    /// Ledger-assigned identifier of an [`Identity`](crate::Identity).
    ///
    /// Serialized as a bare integer so it can travel inside credential
    /// claims as `userId`.
    ///
    /// # Examples
    ///
    /// ```
    /// use zerotrust_ledger::IdentityId;
    ///
    /// let id = IdentityId::from(7);
    /// assert_eq!(i64::from(id), 7);
    /// assert_eq!(id.to_string(), "7");
    /// ```
    IdentityId
);
