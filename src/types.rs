use std::fmt;

/// A generic boxed error type, used at glue points (CLI entry, background
/// threads) that don't carry their own `WavyError` variant.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient `Result` alias returning [`AnyError`].
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Owner nickname: 1-64 bytes, no `/` or NUL (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn parse(s: impl Into<String>) -> Result<Self, crate::error::WavyError> {
        let s = s.into();
        if s.is_empty() || s.len() > 64 || s.contains('/') || s.contains('\0') {
            return Err(crate::error::WavyError::OwnerIdInvalid(s));
        }
        Ok(Self(s))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for OwnerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Content-addressed asset identifier: `hex(SHA-256(canonical archive bytes))`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AssetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
