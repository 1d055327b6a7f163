//! Identifiers for distributable artifacts and transfers.

use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// Opaque, content-addressed identifier of one artifact.
///
/// The distribution source computes the value; this crate only uses it as a
/// map key and as the name of the artifact's directory in the download
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileReference(String);

impl FileReference {
    /// Create a reference from its string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw string value.
    pub fn value(&self) -> &str {
        &self.0
    }

    /// Whether the value can be used as a single directory name.
    pub fn is_path_safe(&self) -> bool {
        is_single_component(&self.0)
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileReference {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FileReference {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A request for one artifact.
///
/// The requester tag is diagnostic metadata only; deduplication is keyed on
/// the reference alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    reference: FileReference,
    requester: String,
}

impl DownloadRequest {
    /// Requester tag used when the caller does not supply one.
    pub const UNKNOWN_REQUESTER: &'static str = "unknown";

    pub fn new(reference: impl Into<FileReference>, requester: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            requester: requester.into(),
        }
    }

    /// Request a reference without naming the requester.
    pub fn for_reference(reference: impl Into<FileReference>) -> Self {
        Self::new(reference, Self::UNKNOWN_REQUESTER)
    }

    pub fn reference(&self) -> &FileReference {
        &self.reference
    }

    pub fn requester(&self) -> &str {
        &self.requester
    }
}

/// Identifier the source assigns to one push transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// True if `name` is exactly one normal path component.
pub(crate) fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(c)), None) if c == name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_requester() {
        let request = DownloadRequest::for_reference("abc");
        assert_eq!(request.reference().value(), "abc");
        assert_eq!(request.requester(), "unknown");
    }

    #[test]
    fn test_requester_is_not_part_of_reference() {
        let a = DownloadRequest::new("abc", "container-1");
        let b = DownloadRequest::new("abc", "container-2");
        assert_eq!(a.reference(), b.reference());
        assert_ne!(a, b);
    }

    #[test]
    fn test_path_safety() {
        assert!(FileReference::new("c5674b55c15c9c95").is_path_safe());
        assert!(!FileReference::new("").is_path_safe());
        assert!(!FileReference::new("..").is_path_safe());
        assert!(!FileReference::new(".").is_path_safe());
        assert!(!FileReference::new("a/b").is_path_safe());
        assert!(!FileReference::new("/abs").is_path_safe());
    }

    #[test]
    fn test_reference_serializes_as_string() {
        let json = serde_json::to_string(&FileReference::new("baz")).unwrap();
        assert_eq!(json, "\"baz\"");
    }
}
