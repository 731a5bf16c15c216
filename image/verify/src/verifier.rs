/*++

Licensed under the Apache-2.0 license.

File Name:

    verifier.rs

Abstract:

    This file is the main implementaiton of SIIP Image Verifier.

--*/

use crate::*;
use siip_error::Artifact;
use siip_image_serde::ImageBundleReader;
use zerocopy::IntoBytes;

/// Replace a bare hash mismatch with the error naming the failed link
fn link_err(err: SiipError, link: SiipError) -> SiipError {
    match err {
        SiipError::HashMismatch => link,
        err => err,
    }
}

/// Image Verifier
pub struct ImageVerifier<Env: ImageVerificationEnv> {
    /// Verification Environment
    env: Env,
}

impl<Env: ImageVerificationEnv> ImageVerifier<Env> {
    /// Create a new instance `ImageVerifier`
    ///
    /// # Arguments
    ///
    /// * `env` - Environment
    pub fn new(env: Env) -> Self {
        Self { env }
    }

    /// Verify the chain of trust of a signed image
    ///
    /// Checks run top-down and stop at the first failure.
    ///
    /// # Arguments
    ///
    /// * `image`          - Signed image bytes
    /// * `ctx`            - Hash selection
    /// * `trusted_issuer` - Trust anchor for the FKM signature
    /// * `subject`        - Expected FBM signing key, if known
    ///
    /// # Returns
    ///
    /// * `ImageVerificationInfo` - Image verification information on success
    pub fn verify(
        &self,
        image: &[u8],
        ctx: &HashContext,
        trusted_issuer: &ImageRsaPubKey,
        subject: Option<&ImageRsaPubKey>,
    ) -> SiipResult<ImageVerificationInfo> {
        let reader = ImageBundleReader::new(image);

        // Verify the FKM against the trust anchor
        let fkm = FirmwareKeyManifest::decode(reader.fkm()?)?;
        let issuer_pub_key_digest = self.verify_fkm_issuer(ctx, &fkm, trusted_issuer)?;

        // Locate FBM, metadata and payload
        let blob = reader.blob_partition()?;
        let fbm = FirmwareBlobManifest::decode(blob.fbm)?;
        let metadata = Metadata::decode(blob.metadata)?;

        // Verify FBM
        let subject_pub_key_digest = self.verify_subject_key(ctx, &fkm, &fbm, subject)?;
        self.verify_fbm_sig(ctx, &fbm)?;

        // Verify metadata
        let metadata_digest = self.verify_metadata(ctx, &fbm, &metadata, blob.metadata)?;

        // Verify payload
        let payload_digest = self.verify_payload(ctx, &metadata, blob.payload)?;

        Ok(ImageVerificationInfo {
            hash: ctx.algorithm,
            issuer_pub_key_digest,
            subject_pub_key_digest,
            key_manifest_svn: fkm.key_manifest_svn,
            svn: fbm.svn,
            metadata_digest,
            payload_digest,
            payload_size: metadata.module_size,
        })
    }

    /// Verify an FKM partition on its own
    ///
    /// When `subject` is given it must be the key authorized by the key
    /// usage entry.
    pub fn verify_fkm(
        &self,
        partition: &[u8],
        ctx: &HashContext,
        trusted_issuer: &ImageRsaPubKey,
        subject: Option<&ImageRsaPubKey>,
    ) -> SiipResult<FkmVerificationInfo> {
        let fkm = FirmwareKeyManifest::decode(ImageBundleReader::new(partition).fkm()?)?;
        let issuer_pub_key_digest = self.verify_fkm_issuer(ctx, &fkm, trusted_issuer)?;

        let entry = &fkm.key_usage_array[0];
        if let Some(subject) = subject {
            self.env
                .verify_digest(ctx, subject.as_bytes(), &entry.key_hash)
                .map_err(|err| link_err(err, SiipError::KeyHashMismatch))?;
            tracing::info!("Subject key authorized by FKM");
        }

        let hash_size = (entry.key_hash_size as usize).min(MAX_HASH_BYTE_SIZE);
        Ok(FkmVerificationInfo {
            hash: ctx.algorithm,
            issuer_pub_key_digest,
            key_manifest_svn: fkm.key_manifest_svn,
            authorized_key_hash: entry.key_hash[..hash_size].to_vec(),
        })
    }

    /// Verify the FKM public key is the trust anchor and the FKM signature
    fn verify_fkm_issuer(
        &self,
        ctx: &HashContext,
        fkm: &FirmwareKeyManifest,
        trusted_issuer: &ImageRsaPubKey,
    ) -> SiipResult<ImageDigest> {
        let trusted_digest = self.env.digest(ctx, trusted_issuer.as_bytes())?;
        let issuer_digest = self
            .env
            .verify_digest(ctx, fkm.header.pub_key().as_bytes(), trusted_digest.as_bytes())
            .map_err(|err| link_err(err, SiipError::UntrustedIssuer))?;
        tracing::debug!(
            "Issuer key {}: {}",
            ctx.algorithm,
            hex::encode(issuer_digest.as_bytes())
        );

        let mut scratch = *fkm;
        scratch.header.clear_signature();
        let result = self.env.rsa_verify(
            ctx,
            scratch.as_bytes(),
            trusted_issuer,
            &fkm.header.signature,
        )?;
        if !result {
            return Err(SiipError::SignatureInvalid(Artifact::Fkm));
        }

        tracing::info!("FKM signature verified");
        Ok(issuer_digest)
    }

    /// Verify the FBM signing key is the one authorized by the FKM
    fn verify_subject_key(
        &self,
        ctx: &HashContext,
        fkm: &FirmwareKeyManifest,
        fbm: &FirmwareBlobManifest,
        subject: Option<&ImageRsaPubKey>,
    ) -> SiipResult<ImageDigest> {
        let pub_key = fbm.header.pub_key();
        let digest = self
            .env
            .verify_digest(ctx, pub_key.as_bytes(), &fkm.key_usage_array[0].key_hash)
            .map_err(|err| link_err(err, SiipError::KeyHashMismatch))?;

        if let Some(subject) = subject {
            if *subject != pub_key {
                return Err(SiipError::SubjectKeyMismatch);
            }
        }

        tracing::info!("FBM key authorized by FKM");
        Ok(digest)
    }

    /// Verify FBM signature with its own, already authorized, key
    fn verify_fbm_sig(&self, ctx: &HashContext, fbm: &FirmwareBlobManifest) -> SiipResult<()> {
        let mut scratch = *fbm;
        scratch.header.clear_signature();
        let result = self.env.rsa_verify(
            ctx,
            scratch.as_bytes(),
            &fbm.header.pub_key(),
            &fbm.header.signature,
        )?;
        if !result {
            return Err(SiipError::SignatureInvalid(Artifact::Fbm));
        }

        tracing::info!("FBM signature verified");
        Ok(())
    }

    /// Verify metadata record against the FBM metadata entry
    fn verify_metadata(
        &self,
        ctx: &HashContext,
        fbm: &FirmwareBlobManifest,
        metadata: &Metadata,
        metadata_bytes: &[u8],
    ) -> SiipResult<ImageDigest> {
        let entry = &fbm.metadata_entries[0];
        let digest = self
            .env
            .verify_digest(ctx, metadata_bytes, &entry.hash)
            .map_err(|err| link_err(err, SiipError::MetadataHashMismatch))?;
        if entry.id != metadata.id {
            return Err(SiipError::MetadataHashMismatch);
        }

        tracing::info!("Metadata hash verified");
        Ok(digest)
    }

    /// Verify payload against the metadata record
    fn verify_payload(
        &self,
        ctx: &HashContext,
        metadata: &Metadata,
        payload: &[u8],
    ) -> SiipResult<ImageDigest> {
        let digest = self
            .env
            .verify_digest(ctx, payload, &metadata.module_hash_value)
            .map_err(|err| link_err(err, SiipError::PayloadHashMismatch))?;
        if metadata.module_size as usize != payload.len() {
            return Err(SiipError::PayloadHashMismatch);
        }

        tracing::info!("Payload hash verified ({} bytes)", payload.len());
        Ok(digest)
    }
}
