/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains the error type shared by the SIIP signing libraries.

--*/
use core::fmt;
use std::path::PathBuf;

/// Signed image artifact a failure is attributed to
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Artifact {
    /// Firmware Key Manifest
    Fkm,

    /// Firmware Blob Manifest
    Fbm,

    /// Metadata record
    Metadata,

    /// Payload
    Payload,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Artifact::Fkm => "FKM",
            Artifact::Fbm => "FBM",
            Artifact::Metadata => "METADATA",
            Artifact::Payload => "PAYLOAD",
        };
        f.write_str(name)
    }
}

/// Error class used by callers to pick a failure report and exit status
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Malformed container, directory or manifest
    Format,

    /// Key rejected by the signing policy
    CryptoPolicy,

    /// A link of the chain of trust does not hold
    Integrity,

    /// File system failure
    Io,

    /// Crypto backend failure (unparsable key, library error)
    Crypto,
}

/// SIIP signing error
#[derive(Debug, thiserror::Error)]
pub enum SiipError {
    #[error("CPD marker not found (found 0x{found:08x})")]
    BadCpdMagic { found: u32 },

    #[error("CPD directory CRC32 invalid (expected 0x{expected:08x}, actual 0x{actual:08x})")]
    CpdChecksumMismatch { expected: u32, actual: u32 },

    #[error("{0} manifest id is not '$MN2'")]
    BadManifestMagic(Artifact),

    #[error("{what} truncated: need {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("CPD entry {name} [0x{offset:x}+0x{length:x}] lies outside the container")]
    EntryOutOfBounds {
        name: String,
        offset: u32,
        length: u32,
    },

    #[error("CPD entries {first} and {second} overlap")]
    EntriesOverlap { first: String, second: String },

    #[error("CPD entry {0} not found")]
    MissingEntry(&'static str),

    #[error("CPD entry name {0:?} longer than 12 bytes")]
    EntryNameTooLong(String),

    #[error("CPD entry {0} appears more than once")]
    DuplicateEntry(String),

    #[error("CPD entry {name} is {actual} bytes, expected {expected}")]
    EntrySizeMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unknown hash algorithm {0:?}")]
    UnknownHashAlgorithm(String),

    #[error("key size {bits} bits is too small (minimum 2048)")]
    KeyTooWeak { bits: u32 },

    #[error("key size {bits} bits does not fit the 2048-bit modulus field")]
    KeyUnsupported { bits: u32 },

    #[error("hash values mismatch")]
    HashMismatch,

    #[error("FKM public key does not match the trusted issuer key")]
    UntrustedIssuer,

    #[error("{0} signature invalid")]
    SignatureInvalid(Artifact),

    #[error("FBM public key hash does not match the FKM key usage entry")]
    KeyHashMismatch,

    #[error("subject public key does not match the FBM signing key")]
    SubjectKeyMismatch,

    #[error("metadata hash mismatch")]
    MetadataHashMismatch,

    #[error("payload hash mismatch")]
    PayloadHashMismatch,

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl SiipError {
    /// Create an I/O error tagged with the offending path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SiipError::Io {
            path: path.into(),
            source,
        }
    }

    /// Error class
    pub fn kind(&self) -> ErrorKind {
        match self {
            SiipError::BadCpdMagic { .. }
            | SiipError::CpdChecksumMismatch { .. }
            | SiipError::BadManifestMagic(_)
            | SiipError::Truncated { .. }
            | SiipError::EntryOutOfBounds { .. }
            | SiipError::EntriesOverlap { .. }
            | SiipError::MissingEntry(_)
            | SiipError::EntryNameTooLong(_)
            | SiipError::DuplicateEntry(_)
            | SiipError::EntrySizeMismatch { .. }
            | SiipError::UnknownHashAlgorithm(_) => ErrorKind::Format,
            SiipError::KeyTooWeak { .. } | SiipError::KeyUnsupported { .. } => {
                ErrorKind::CryptoPolicy
            }
            SiipError::HashMismatch
            | SiipError::UntrustedIssuer
            | SiipError::SignatureInvalid(_)
            | SiipError::KeyHashMismatch
            | SiipError::SubjectKeyMismatch
            | SiipError::MetadataHashMismatch
            | SiipError::PayloadHashMismatch => ErrorKind::Integrity,
            SiipError::Io { .. } => ErrorKind::Io,
            SiipError::Crypto(_) => ErrorKind::Crypto,
        }
    }

    /// Artifact whose check failed, when the failure belongs to one link
    pub fn artifact(&self) -> Option<Artifact> {
        match self {
            SiipError::BadManifestMagic(artifact) | SiipError::SignatureInvalid(artifact) => {
                Some(*artifact)
            }
            SiipError::UntrustedIssuer => Some(Artifact::Fkm),
            SiipError::KeyHashMismatch | SiipError::SubjectKeyMismatch => Some(Artifact::Fbm),
            SiipError::MetadataHashMismatch => Some(Artifact::Metadata),
            SiipError::PayloadHashMismatch => Some(Artifact::Payload),
            _ => None,
        }
    }
}

pub type SiipResult<T> = Result<T, SiipError>;
