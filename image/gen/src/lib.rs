/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains data strucutres for the SIIP Image Generator.

--*/

mod generator;

pub use generator::ImageGenerator;
pub use siip_image_serde::SignedImage;

use siip_error::SiipResult;
use siip_image_types::*;
use std::path::Path;
use zerocopy::IntoBytes;

/// Image Generator Crypto Trait
pub trait ImageGeneratorCrypto {
    /// Private key handle
    type RsaPrivKey;

    /// Calculate digest with the algorithm selected in `ctx`
    fn digest(&self, ctx: &HashContext, data: &[u8]) -> SiipResult<ImageDigest>;

    /// Calculate RSA PKCS#1 v1.5 signature over `data`.
    ///
    /// Fails with `KeyTooWeak` for keys smaller than 2048 bits.
    fn rsa_sign(
        &self,
        ctx: &HashContext,
        data: &[u8],
        priv_key: &Self::RsaPrivKey,
    ) -> SiipResult<ImageRsaSignature>;

    /// Public half of `priv_key` in manifest layout
    fn rsa_pub_key(&self, priv_key: &Self::RsaPrivKey) -> SiipResult<ImageRsaPubKey>;

    /// Read RSA Private Key from PEM file
    fn rsa_priv_key_from_pem(path: &Path) -> SiipResult<Self::RsaPrivKey>;

    /// Read RSA Public Key from PEM file
    fn rsa_pub_key_from_pem(path: &Path) -> SiipResult<ImageRsaPubKey>;

    /// Calculate public key digest
    fn pub_key_digest(
        &self,
        ctx: &HashContext,
        pub_key: &ImageRsaPubKey,
    ) -> SiipResult<ImageDigest> {
        self.digest(ctx, pub_key.as_bytes())
    }
}

/// Manifest field values not derived from keys or payload
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ManifestConfig {
    pub vendor: u32,

    /// BCD date 0xYYYYMMDD
    pub date: u32,

    pub svn: u32,

    pub key_manifest_svn: u32,

    pub oem_id: u16,

    pub key_manifest_id: u8,

    pub package_name: u32,

    pub version_control_num: u64,

    /// Role bit set in every usage bitmap
    pub usage_bit: u32,

    pub metadata_id: u32,

    pub module_id: u32,

    pub fw_type: u8,

    pub fw_subtype: u8,

    pub subpart_name: [u8; 4],
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            vendor: MANIFEST_VENDOR_INTEL,
            date: 0,
            svn: 0,
            key_manifest_svn: 0,
            oem_id: 0,
            key_manifest_id: 0,
            package_name: PACKAGE_NAME_OSE,
            version_control_num: 0,
            usage_bit: KEY_USAGE_OSE_FIRMWARE,
            metadata_id: METADATA_ID_DEFAULT,
            module_id: METADATA_MODULE_ID_DEFAULT,
            fw_type: 0,
            fw_subtype: 0,
            subpart_name: CPD_SUBPART_NAME,
        }
    }
}

/// Image Generator Configuration
///
/// `issuer_key` signs the FKM and `subject_key` signs the FBM. Both may
/// refer to the same key.
pub struct ImageGeneratorConfig<'a, K> {
    pub hash: HashContext,

    pub manifest: ManifestConfig,

    pub issuer_key: &'a K,

    pub subject_key: &'a K,

    pub payload: &'a [u8],
}
