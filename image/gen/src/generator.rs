/*++

Licensed under the Apache-2.0 license.

File Name:

   generator.rs

Abstract:

    SIIP signed image generator

--*/
use siip_error::SiipResult;
use siip_image_serde::{blob_partition, fkm_partition};
use siip_image_types::*;
use zerocopy::{FromZeros, IntoBytes};

use crate::*;

/// Image generator
pub struct ImageGenerator<Crypto: ImageGeneratorCrypto> {
    crypto: Crypto,
}

impl<Crypto: ImageGeneratorCrypto> ImageGenerator<Crypto> {
    const DEFAULT_FLAGS: u32 = 0;

    /// Create an instance `ImageGenerator`
    pub fn new(crypto: Crypto) -> Self {
        Self { crypto }
    }

    /// Generate signed image
    ///
    /// # Arguments
    ///
    /// * `config` - Image generator configuration
    ///
    /// # Returns
    ///
    /// * `SignedImage` - FKM partition and blob partition
    pub fn generate(
        &self,
        config: &ImageGeneratorConfig<Crypto::RsaPrivKey>,
    ) -> SiipResult<SignedImage> {
        let ctx = &config.hash;

        // Metadata carries the payload digest
        let metadata = self.gen_metadata(ctx, &config.manifest, config.payload)?;

        // FBM carries the metadata digest and is signed by the subject key
        let subject_pub_key = self.crypto.rsa_pub_key(config.subject_key)?;
        let fbm = self.gen_fbm(
            ctx,
            &config.manifest,
            &metadata,
            config.subject_key,
            &subject_pub_key,
        )?;

        // FKM authorizes the subject key and is signed by the issuer key
        let fkm = self.gen_fkm(ctx, &config.manifest, config.issuer_key, &subject_pub_key)?;

        let image = SignedImage {
            fkm_partition: fkm_partition(&fkm, config.manifest.subpart_name)?,
            blob_partition: blob_partition(
                &fbm,
                &metadata,
                config.payload,
                config.manifest.subpart_name,
            )?,
        };
        tracing::info!(
            "Signed image: FKM partition 0x{:x} bytes, blob partition 0x{:x} bytes",
            image.fkm_partition.len(),
            image.blob_partition.len()
        );
        Ok(image)
    }

    /// Generate the FKM partition alone
    pub fn generate_fkm_partition(
        &self,
        ctx: &HashContext,
        manifest: &ManifestConfig,
        issuer_key: &Crypto::RsaPrivKey,
        subject_pub_key: &ImageRsaPubKey,
    ) -> SiipResult<Vec<u8>> {
        let fkm = self.gen_fkm(ctx, manifest, issuer_key, subject_pub_key)?;
        fkm_partition(&fkm, manifest.subpart_name)
    }

    /// Create metadata record
    pub fn gen_metadata(
        &self,
        ctx: &HashContext,
        config: &ManifestConfig,
        payload: &[u8],
    ) -> SiipResult<Metadata> {
        let digest = self.crypto.digest(ctx, payload)?;
        tracing::debug!("Payload {}: {}", ctx.algorithm, hex::encode(digest.as_bytes()));

        let mut metadata = Metadata::new_zeroed();
        metadata.size = Metadata::SIZE as u32;
        metadata.id = config.metadata_id;
        metadata.version = 0;
        metadata.num_of_modules = 1;
        metadata.module_id = config.module_id;
        metadata.module_size = payload.len() as u32;
        metadata.module_hash_size = digest.len() as u32;
        metadata.module_hash_algorithm = ctx.algorithm.id() as u32;
        metadata.module_hash_value = digest.to_padded();
        metadata.num_of_keys = 1;
        metadata.key_usage_id = usage_bitmap(config.usage_bit);
        metadata.non_std_section_size = 0;
        Ok(metadata)
    }

    /// Create and sign the Firmware Blob Manifest
    pub fn gen_fbm(
        &self,
        ctx: &HashContext,
        config: &ManifestConfig,
        metadata: &Metadata,
        subject_key: &Crypto::RsaPrivKey,
        subject_pub_key: &ImageRsaPubKey,
    ) -> SiipResult<FirmwareBlobManifest> {
        let digest = self.crypto.digest(ctx, metadata.as_bytes())?;
        tracing::debug!("Metadata {}: {}", ctx.algorithm, hex::encode(digest.as_bytes()));

        let mut fbm = FirmwareBlobManifest::new_zeroed();
        fbm.header = self.gen_header(config, FirmwareBlobManifest::SIZE, 1);
        fbm.extension_type = FBM_EXTENSION_TYPE;
        fbm.extension_length = FirmwareBlobManifest::SIZE as u32;
        fbm.package_name = config.package_name;
        fbm.version_control_num = config.version_control_num;
        fbm.usage_bitmap = usage_bitmap(config.usage_bit);
        fbm.svn = config.svn;
        fbm.fw_type = config.fw_type;
        fbm.fw_subtype = config.fw_subtype;
        fbm.num_of_devices = FBM_DEVICE_COUNT as u32;

        let entry = &mut fbm.metadata_entries[0];
        entry.id = metadata.id;
        entry.r#type = METADATA_ENTRY_TYPE_DATA;
        entry.hash_algorithm = ctx.algorithm.id();
        entry.hash_size = digest.len() as u16;
        entry.size = Metadata::SIZE as u32;
        entry.hash = digest.to_padded();

        let signature = self.crypto.rsa_sign(ctx, fbm.as_bytes(), subject_key)?;
        fbm.header.set_signature(subject_pub_key, &signature);
        Ok(fbm)
    }

    /// Create and sign the Firmware Key Manifest
    pub fn gen_fkm(
        &self,
        ctx: &HashContext,
        config: &ManifestConfig,
        issuer_key: &Crypto::RsaPrivKey,
        subject_pub_key: &ImageRsaPubKey,
    ) -> SiipResult<FirmwareKeyManifest> {
        let key_digest = self.crypto.pub_key_digest(ctx, subject_pub_key)?;
        tracing::debug!(
            "Subject key {}: {}",
            ctx.algorithm,
            hex::encode(key_digest.as_bytes())
        );

        let mut fkm = FirmwareKeyManifest::new_zeroed();
        fkm.header = self.gen_header(config, FirmwareKeyManifest::SIZE, 0);
        fkm.extension_type = FKM_EXTENSION_TYPE;
        fkm.extension_length = FirmwareKeyManifest::EXTENSION_LENGTH;
        fkm.key_manifest_type = FKM_KEY_MANIFEST_TYPE;
        fkm.key_manifest_svn = config.key_manifest_svn;
        fkm.oem_id = config.oem_id;
        fkm.key_manifest_id = config.key_manifest_id;
        fkm.num_of_keys = FKM_KEY_COUNT as u32;

        let entry = &mut fkm.key_usage_array[0];
        entry.key_usage = usage_bitmap(config.usage_bit);
        entry.key_policy = KEY_POLICY_INTEL_ONLY;
        entry.key_hash_algorithm = ctx.algorithm.id();
        entry.key_hash_size = key_digest.len() as u16;
        entry.key_hash = key_digest.to_padded();

        let issuer_pub_key = self.crypto.rsa_pub_key(issuer_key)?;
        let signature = self.crypto.rsa_sign(ctx, fkm.as_bytes(), issuer_key)?;
        fkm.header.set_signature(&issuer_pub_key, &signature);
        Ok(fkm)
    }

    /// Generate header with key and signature fields zeroed
    fn gen_header(
        &self,
        config: &ManifestConfig,
        size: usize,
        num_of_metadata: u32,
    ) -> ManifestHeader {
        let mut header = ManifestHeader::new(size, num_of_metadata, config.vendor, config.date);
        header.flags = Self::DEFAULT_FLAGS;
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siip_error::SiipError;
    use siip_image_serde::ImageBundleReader;
    use std::path::Path;

    /// Crypto stand-in. Keys are a single byte; "signatures" repeat the key
    /// byte followed by the digest.
    struct TestCrypto;

    impl ImageGeneratorCrypto for TestCrypto {
        type RsaPrivKey = u8;

        fn digest(&self, ctx: &HashContext, data: &[u8]) -> SiipResult<ImageDigest> {
            let value: Vec<u8> = (0..ctx.digest_size)
                .map(|slot| {
                    let seed = 0xcbf2_9ce4_8422_2325u64 ^ slot as u64;
                    let h = data.iter().fold(seed, |h, b| {
                        (h ^ *b as u64).wrapping_mul(0x0100_0000_01b3)
                    });
                    (h >> 56) as u8 ^ h as u8
                })
                .collect();
            Ok(ImageDigest::from_slice(&value))
        }

        fn rsa_sign(
            &self,
            ctx: &HashContext,
            data: &[u8],
            priv_key: &u8,
        ) -> SiipResult<ImageRsaSignature> {
            if *priv_key == 0 {
                return Err(SiipError::KeyTooWeak { bits: 1024 });
            }
            let mut signature = [*priv_key; RSA_SIGNATURE_BYTE_SIZE];
            let digest = self.digest(ctx, data)?;
            signature[1..1 + digest.len()].copy_from_slice(digest.as_bytes());
            Ok(signature)
        }

        fn rsa_pub_key(&self, priv_key: &u8) -> SiipResult<ImageRsaPubKey> {
            Ok(ImageRsaPubKey {
                modulus: [*priv_key; RSA_MODULUS_BYTE_SIZE],
                exponent: [1, 0, 1, 0],
            })
        }

        fn rsa_priv_key_from_pem(_path: &Path) -> SiipResult<u8> {
            Ok(1)
        }

        fn rsa_pub_key_from_pem(_path: &Path) -> SiipResult<ImageRsaPubKey> {
            TestCrypto.rsa_pub_key(&1)
        }
    }

    fn generate(
        issuer: u8,
        subject: u8,
        alg: HashAlgorithm,
        payload: &[u8],
    ) -> SiipResult<SignedImage> {
        let config = ImageGeneratorConfig {
            hash: HashContext::new(alg),
            manifest: ManifestConfig {
                date: 0x2019_0418,
                ..Default::default()
            },
            issuer_key: &issuer,
            subject_key: &subject,
            payload,
        };
        ImageGenerator::new(TestCrypto).generate(&config)
    }

    #[test]
    fn test_generate_layout() {
        let payload = vec![0x5A; 300];
        let image = generate(1, 2, HashAlgorithm::Sha384, &payload).unwrap();
        let bytes = image.to_bytes();
        let reader = ImageBundleReader::new(&bytes);

        let fkm = FirmwareKeyManifest::decode(reader.fkm().unwrap()).unwrap();
        assert_eq!(fkm.header.r#type, MANIFEST_TYPE);
        assert_eq!(fkm.header.length, 161);
        assert_eq!(fkm.header.size as usize * 4, FirmwareKeyManifest::SIZE);
        assert_eq!(fkm.header.date, 0x2019_0418);
        assert_eq!(fkm.header.vendor, MANIFEST_VENDOR_INTEL);
        assert_eq!(fkm.header.num_of_metadata, 0);
        assert_eq!(fkm.header.public_key, [1; 256]);
        assert_eq!(fkm.extension_type, 14);
        assert_eq!(fkm.extension_length, 104);
        assert_eq!(fkm.key_manifest_type, 4);
        assert_eq!(fkm.num_of_keys, 1);
        let entry = &fkm.key_usage_array[0];
        assert_eq!(entry.key_usage[7], 0x08);
        assert_eq!(entry.key_policy, 1);
        assert_eq!(entry.key_hash_algorithm, 3);
        assert_eq!(entry.key_hash_size, 48);
        assert_eq!(&entry.key_hash[48..], &[0u8; 16]);

        let blob = reader.blob_partition().unwrap();
        let fbm = FirmwareBlobManifest::decode(blob.fbm).unwrap();
        let metadata = Metadata::decode(blob.metadata).unwrap();
        assert_eq!(fbm.header.public_key, [2; 256]);
        assert_eq!(fbm.header.num_of_metadata, 1);
        assert_eq!(fbm.extension_type, 15);
        assert_eq!(fbm.extension_length, 784);
        assert_eq!(fbm.package_name, PACKAGE_NAME_OSE);
        assert_eq!(fbm.num_of_devices, 4);
        assert_eq!(fbm.metadata_entries[0].id, metadata.id);
        assert_eq!(fbm.metadata_entries[0].r#type, 2);
        assert_eq!(fbm.metadata_entries[0].size, 128);
        assert_eq!(metadata.id, METADATA_ID_DEFAULT);
        assert_eq!(metadata.module_id, 0xFF);
        assert_eq!(metadata.module_size, 300);
        assert_eq!(metadata.module_hash_size, 48);
        assert_eq!(metadata.module_hash_algorithm, 3);
        assert_eq!(blob.payload, &payload[..]);
    }

    #[test]
    fn test_signature_covers_zeroed_fields() {
        let image = generate(1, 1, HashAlgorithm::Sha256, b"payload").unwrap();
        let bytes = image.to_bytes();
        let reader = ImageBundleReader::new(&bytes);
        let fkm = FirmwareKeyManifest::decode(reader.fkm().unwrap()).unwrap();

        let mut scratch = fkm;
        scratch.header.clear_signature();
        let digest = TestCrypto
            .digest(&HashContext::new(HashAlgorithm::Sha256), scratch.as_bytes())
            .unwrap();
        assert_eq!(&fkm.header.signature[1..33], digest.as_bytes());
    }

    #[test]
    fn test_key_hash_binds_subject() {
        let ctx = HashContext::new(HashAlgorithm::Sha512);
        let image = generate(1, 7, HashAlgorithm::Sha512, &[]).unwrap();
        let bytes = image.to_bytes();
        let reader = ImageBundleReader::new(&bytes);
        let fkm = FirmwareKeyManifest::decode(reader.fkm().unwrap()).unwrap();
        let expected = TestCrypto
            .pub_key_digest(&ctx, &TestCrypto.rsa_pub_key(&7).unwrap())
            .unwrap();
        assert!(expected.matches(&fkm.key_usage_array[0].key_hash));
    }

    #[test]
    fn test_weak_key() {
        assert!(matches!(
            generate(0, 1, HashAlgorithm::Sha256, b"x"),
            Err(SiipError::KeyTooWeak { .. })
        ));
        assert!(matches!(
            generate(1, 0, HashAlgorithm::Sha256, b"x"),
            Err(SiipError::KeyTooWeak { .. })
        ));
    }

    #[test]
    fn test_fkm_partition_alone() {
        let gen = ImageGenerator::new(TestCrypto);
        let ctx = HashContext::new(HashAlgorithm::Sha256);
        let subject = TestCrypto.rsa_pub_key(&9).unwrap();
        let partition = gen
            .generate_fkm_partition(&ctx, &ManifestConfig::default(), &3, &subject)
            .unwrap();
        assert_eq!(partition.len(), 20 + 24 + FirmwareKeyManifest::SIZE);
        let fkm = FirmwareKeyManifest::decode(&partition[44..]).unwrap();
        assert_eq!(fkm.header.public_key, [3; 256]);
    }
}
