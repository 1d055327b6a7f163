//! Artifact encodings and compression types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Compression applied to an artifact payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Gzip,
}

impl CompressionType {
    /// Wire and configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
        }
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self, CompressionType::None)
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionType::None),
            "gzip" => Ok(CompressionType::Gzip),
            _ => Err(CodecError::UnknownCompression(s.to_string())),
        }
    }
}

/// Encoding tag as carried on the wire, before it is paired with a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingType {
    /// A single file written verbatim.
    File,
    /// A tar archive, optionally compressed.
    Archive,
    /// An in-memory payload delivered in one shot.
    Blob,
}

impl EncodingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodingType::File => "file",
            EncodingType::Archive => "compressed",
            EncodingType::Blob => "blob",
        }
    }

    /// Pair the tag with a name and compression.
    ///
    /// Single files are never compressed; the compression is dropped.
    pub fn into_encoding(
        self,
        name: impl Into<String>,
        compression: CompressionType,
    ) -> ArtifactEncoding {
        let name = name.into();
        match self {
            EncodingType::File => ArtifactEncoding::SingleFile { name },
            EncodingType::Archive => ArtifactEncoding::Archive { name, compression },
            EncodingType::Blob => ArtifactEncoding::Blob { name, compression },
        }
    }
}

impl fmt::Display for EncodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncodingType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(EncodingType::File),
            "compressed" => Ok(EncodingType::Archive),
            "blob" => Ok(EncodingType::Blob),
            _ => Err(CodecError::UnknownEncoding(s.to_string())),
        }
    }
}

/// How the bytes of an artifact map to its final filesystem form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactEncoding {
    /// Written verbatim to `<reference>/<name>`.
    SingleFile { name: String },
    /// Tar archive unpacked into `<reference>/<name>/`.
    Archive {
        name: String,
        compression: CompressionType,
    },
    /// Single-shot payload, decompressed and written like a single file.
    Blob {
        name: String,
        compression: CompressionType,
    },
}

impl ArtifactEncoding {
    pub fn name(&self) -> &str {
        match self {
            ArtifactEncoding::SingleFile { name }
            | ArtifactEncoding::Archive { name, .. }
            | ArtifactEncoding::Blob { name, .. } => name,
        }
    }

    pub fn compression(&self) -> CompressionType {
        match self {
            ArtifactEncoding::SingleFile { .. } => CompressionType::None,
            ArtifactEncoding::Archive { compression, .. }
            | ArtifactEncoding::Blob { compression, .. } => *compression,
        }
    }

    pub fn encoding_type(&self) -> EncodingType {
        match self {
            ArtifactEncoding::SingleFile { .. } => EncodingType::File,
            ArtifactEncoding::Archive { .. } => EncodingType::Archive,
            ArtifactEncoding::Blob { .. } => EncodingType::Blob,
        }
    }
}
