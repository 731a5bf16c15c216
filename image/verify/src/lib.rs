/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    SIIP Image Verification library.

--*/

mod verifier;

use siip_error::{SiipError, SiipResult};
use siip_image_types::*;

pub use verifier::ImageVerifier;

/// Verified image information
#[derive(Debug, Clone)]
pub struct ImageVerificationInfo {
    /// Hash algorithm the chain was verified with
    pub hash: HashAlgorithm,

    /// Digest of the issuer public key that signed the FKM
    pub issuer_pub_key_digest: ImageDigest,

    /// Digest of the subject public key that signed the FBM
    pub subject_pub_key_digest: ImageDigest,

    /// Key manifest security version number
    pub key_manifest_svn: u32,

    /// Firmware security version number
    pub svn: u32,

    /// Digest of the metadata record
    pub metadata_digest: ImageDigest,

    /// Digest of the payload
    pub payload_digest: ImageDigest,

    /// Payload size in bytes
    pub payload_size: u32,
}

/// Verified Firmware Key Manifest information
#[derive(Debug, Clone)]
pub struct FkmVerificationInfo {
    pub hash: HashAlgorithm,

    pub issuer_pub_key_digest: ImageDigest,

    pub key_manifest_svn: u32,

    /// Authorized subject key hash, `key_hash_size` bytes
    pub authorized_key_hash: Vec<u8>,
}

/// Image Verification Environment
pub trait ImageVerificationEnv {
    /// Calculate digest with the algorithm selected in `ctx`
    fn digest(&self, ctx: &HashContext, data: &[u8]) -> SiipResult<ImageDigest>;

    /// Perform RSA PKCS#1 v1.5 Verification
    fn rsa_verify(
        &self,
        ctx: &HashContext,
        data: &[u8],
        pub_key: &ImageRsaPubKey,
        sig: &ImageRsaSignature,
    ) -> SiipResult<bool>;

    /// Calculate the digest of `data` and compare it against the first
    /// `digest_size` bytes of `expected`
    fn verify_digest(
        &self,
        ctx: &HashContext,
        data: &[u8],
        expected: &[u8],
    ) -> SiipResult<ImageDigest> {
        let digest = self.digest(ctx, data)?;
        if !digest.matches(expected) {
            return Err(SiipError::HashMismatch);
        }
        Ok(digest)
    }
}
