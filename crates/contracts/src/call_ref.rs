//! CallRef - Cheap-to-clone payload file reference
//!
//! Uses Arc<str> internally for O(1) clone operations.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// Reference to the payload file backing a pending call.
///
/// This is the identity of a [`crate::PendingCall`]: two calls with the same
/// reference are the same call. The reference is the payload file stem, so it
/// must only contain characters that are safe in a file name.
///
/// # Examples
/// ```
/// use contracts::CallRef;
///
/// let r: CallRef = "1700000000000-7f3a".into();
/// let r2 = r.clone();  // O(1) - just increments ref count
/// assert_eq!(r, r2);
/// assert_eq!(r.as_str(), "1700000000000-7f3a");
/// ```
#[derive(Clone, Default)]
pub struct CallRef(Arc<str>);

impl CallRef {
    /// Create a new CallRef from a string slice.
    #[inline]
    pub fn new(s: &str) -> Self {
        Self(Arc::from(s))
    }

    /// Get the underlying string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the reference can be used as a file stem.
    pub fn is_file_safe(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl Deref for CallRef {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for CallRef {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CallRef {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallRef {
    #[inline]
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for CallRef {
    #[inline]
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for CallRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CallRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallRef({:?})", self.0)
    }
}

impl PartialEq for CallRef {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for CallRef {}

impl PartialEq<str> for CallRef {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for CallRef {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

// Must hash identically to str so Borrow<str> lookups work in HashMaps.
impl Hash for CallRef {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Serialize for CallRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CallRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(CallRef::from(s))
    }
}
