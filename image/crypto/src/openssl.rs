/*++

Licensed under the Apache-2.0 license.

File Name:

   openssl.rs

Abstract:

    OpenSSL implementation of the image generator and verifier crypto.

--*/

use std::path::Path;

use siip_error::{SiipError, SiipResult};
use siip_image_gen::ImageGeneratorCrypto;
use siip_image_types::*;
use siip_image_verify::ImageVerificationEnv;

use openssl::{
    bn::BigNum,
    error::ErrorStack,
    hash::{hash, MessageDigest},
    pkey::{PKey, Private, Public},
    rsa::Rsa,
    sign::{Signer, Verifier},
};

#[derive(Default)]
pub struct OsslCrypto {}

/// RSA private key accepted for signing
pub struct OsslRsaPrivKey(PKey<Private>);

impl OsslRsaPrivKey {
    /// Modulus size in bits
    pub fn bits(&self) -> u32 {
        self.0.bits()
    }
}

fn crypto_err(err: ErrorStack) -> SiipError {
    SiipError::Crypto(err.to_string())
}

fn message_digest(ctx: &HashContext) -> MessageDigest {
    match ctx.algorithm {
        HashAlgorithm::Sha256 => MessageDigest::sha256(),
        HashAlgorithm::Sha384 => MessageDigest::sha384(),
        HashAlgorithm::Sha512 => MessageDigest::sha512(),
    }
}

/// Enforce the key strength policy; the manifest holds exactly one
/// 2048-bit modulus
fn check_key_bits(bits: u32) -> SiipResult<()> {
    if bits < RSA_KEY_BITS {
        return Err(SiipError::KeyTooWeak { bits });
    }
    if bits > RSA_KEY_BITS {
        return Err(SiipError::KeyUnsupported { bits });
    }
    Ok(())
}

fn read_pem(path: &Path) -> SiipResult<Vec<u8>> {
    std::fs::read(path).map_err(|err| SiipError::io(path, err))
}

fn pack_pub_key<T>(rsa: &Rsa<T>) -> SiipResult<ImageRsaPubKey>
where
    T: openssl::pkey::HasPublic,
{
    let bits = rsa.n().num_bits() as u32;
    check_key_bits(bits)?;
    let modulus = pack_num(&rsa.n().to_vec()).ok_or(SiipError::KeyUnsupported { bits })?;
    let exponent = pack_num(&rsa.e().to_vec()).ok_or(SiipError::KeyUnsupported { bits })?;
    Ok(ImageRsaPubKey { modulus, exponent })
}

impl OsslCrypto {
    /// Parse an RSA private key in PKCS#1 or PKCS#8 PEM form
    pub fn priv_key_from_pem_bytes(pem: &[u8]) -> SiipResult<OsslRsaPrivKey> {
        let key = PKey::private_key_from_pem(pem).map_err(crypto_err)?;
        if key.rsa().is_err() {
            return Err(SiipError::Crypto("not an RSA private key".into()));
        }
        check_key_bits(key.bits())?;
        Ok(OsslRsaPrivKey(key))
    }

    /// Parse an RSA public key from a SubjectPublicKeyInfo, PKCS#1 public
    /// or private key PEM
    pub fn pub_key_from_pem_bytes(pem: &[u8]) -> SiipResult<ImageRsaPubKey> {
        if let Ok(key) = PKey::public_key_from_pem(pem) {
            let rsa = key.rsa().map_err(crypto_err)?;
            return pack_pub_key(&rsa);
        }
        if let Ok(rsa) = Rsa::public_key_from_pem_pkcs1(pem) {
            return pack_pub_key(&rsa);
        }
        let key = PKey::private_key_from_pem(pem).map_err(crypto_err)?;
        let rsa = key.rsa().map_err(crypto_err)?;
        pack_pub_key(&rsa)
    }

    fn pub_key_to_pkey(pub_key: &ImageRsaPubKey) -> SiipResult<PKey<Public>> {
        let n = BigNum::from_slice(&unpack_num(&pub_key.modulus)).map_err(crypto_err)?;
        let e = BigNum::from_slice(&unpack_num(&pub_key.exponent)).map_err(crypto_err)?;
        let rsa = Rsa::from_public_components(n, e).map_err(crypto_err)?;
        PKey::from_rsa(rsa).map_err(crypto_err)
    }

    fn digest(&self, ctx: &HashContext, data: &[u8]) -> SiipResult<ImageDigest> {
        let digest = hash(message_digest(ctx), data).map_err(crypto_err)?;
        Ok(ImageDigest::from_slice(&digest))
    }
}

impl ImageGeneratorCrypto for OsslCrypto {
    type RsaPrivKey = OsslRsaPrivKey;

    fn digest(&self, ctx: &HashContext, data: &[u8]) -> SiipResult<ImageDigest> {
        OsslCrypto::digest(self, ctx, data)
    }

    fn rsa_sign(
        &self,
        ctx: &HashContext,
        data: &[u8],
        priv_key: &OsslRsaPrivKey,
    ) -> SiipResult<ImageRsaSignature> {
        check_key_bits(priv_key.bits())?;

        let mut signer = Signer::new(message_digest(ctx), &priv_key.0).map_err(crypto_err)?;
        signer.update(data).map_err(crypto_err)?;
        let sig = signer.sign_to_vec().map_err(crypto_err)?;

        let sig: ImageRsaSignature = sig.as_slice().try_into().map_err(|_| {
            SiipError::Crypto(format!("unexpected signature length {}", sig.len()))
        })?;
        tracing::debug!("Signature: {}", hex::encode(sig));
        Ok(sig)
    }

    fn rsa_pub_key(&self, priv_key: &OsslRsaPrivKey) -> SiipResult<ImageRsaPubKey> {
        let rsa = priv_key.0.rsa().map_err(crypto_err)?;
        let pub_key = pack_pub_key(&rsa)?;
        tracing::debug!("Modulus: {}", hex::encode(pub_key.modulus));
        tracing::debug!("Exponent: {}", hex::encode(pub_key.exponent));
        Ok(pub_key)
    }

    fn rsa_priv_key_from_pem(path: &Path) -> SiipResult<OsslRsaPrivKey> {
        let pem = read_pem(path)?;
        OsslCrypto::priv_key_from_pem_bytes(&pem)
    }

    fn rsa_pub_key_from_pem(path: &Path) -> SiipResult<ImageRsaPubKey> {
        let pem = read_pem(path)?;
        OsslCrypto::pub_key_from_pem_bytes(&pem)
    }
}

impl ImageVerificationEnv for OsslCrypto {
    fn digest(&self, ctx: &HashContext, data: &[u8]) -> SiipResult<ImageDigest> {
        OsslCrypto::digest(self, ctx, data)
    }

    fn rsa_verify(
        &self,
        ctx: &HashContext,
        data: &[u8],
        pub_key: &ImageRsaPubKey,
        sig: &ImageRsaSignature,
    ) -> SiipResult<bool> {
        let pkey = OsslCrypto::pub_key_to_pkey(pub_key)?;
        let mut verifier = Verifier::new(message_digest(ctx), &pkey).map_err(crypto_err)?;
        verifier.update(data).map_err(crypto_err)?;

        // A malformed signature is reported by OpenSSL as an error
        match verifier.verify(sig) {
            Ok(result) => Ok(result),
            Err(err) => {
                tracing::debug!("RSA verify: {err}");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siip_image_fake_keys::*;

    fn ctx(alg: HashAlgorithm) -> HashContext {
        HashContext::new(alg)
    }

    #[test]
    fn test_digest_sizes() {
        let crypto = OsslCrypto::default();
        for alg in HashAlgorithm::ALL {
            let digest = ImageGeneratorCrypto::digest(&crypto, &ctx(alg), b"abc").unwrap();
            assert_eq!(digest.len(), alg.digest_size());
        }
        let digest =
            ImageGeneratorCrypto::digest(&crypto, &ctx(HashAlgorithm::Sha256), b"abc").unwrap();
        assert_eq!(
            hex::encode(digest.as_bytes()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_pub_key_from_private_and_public_pem() {
        let crypto = OsslCrypto::default();
        let priv_key =
            OsslCrypto::priv_key_from_pem_bytes(ISSUER_KEY_PRIVATE_PEM.as_bytes()).unwrap();
        let from_priv = crypto.rsa_pub_key(&priv_key).unwrap();
        let from_pub =
            OsslCrypto::pub_key_from_pem_bytes(ISSUER_KEY_PUBLIC_PEM.as_bytes()).unwrap();
        let from_priv_pem =
            OsslCrypto::pub_key_from_pem_bytes(ISSUER_KEY_PRIVATE_PEM.as_bytes()).unwrap();
        assert_eq!(from_priv, from_pub);
        assert_eq!(from_priv, from_priv_pem);
        assert_eq!(from_pub.exponent, [0x01, 0x00, 0x01, 0x00]);
        // Modulus is packed little-endian; the top bit of a 2048-bit modulus
        // lands in the last byte
        assert!(from_pub.modulus[RSA_MODULUS_BYTE_SIZE - 1] & 0x80 != 0);
    }

    #[test]
    fn test_key_strength() {
        assert!(matches!(
            OsslCrypto::priv_key_from_pem_bytes(WEAK_KEY_PRIVATE_PEM.as_bytes()),
            Err(SiipError::KeyTooWeak { bits: 1024 })
        ));
        assert!(matches!(
            OsslCrypto::pub_key_from_pem_bytes(WEAK_KEY_PRIVATE_PEM.as_bytes()),
            Err(SiipError::KeyTooWeak { bits: 1024 })
        ));
        assert!(matches!(
            OsslCrypto::priv_key_from_pem_bytes(WIDE_KEY_PRIVATE_PEM.as_bytes()),
            Err(SiipError::KeyUnsupported { bits: 3072 })
        ));
    }

    #[test]
    fn test_sign_weak_key_rejected() {
        let crypto = OsslCrypto::default();
        let weak = OsslRsaPrivKey(
            PKey::private_key_from_pem(WEAK_KEY_PRIVATE_PEM.as_bytes()).unwrap(),
        );
        assert!(matches!(
            crypto.rsa_sign(&ctx(HashAlgorithm::Sha256), b"data", &weak),
            Err(SiipError::KeyTooWeak { bits: 1024 })
        ));
    }

    #[test]
    fn test_sign_verify() {
        let crypto = OsslCrypto::default();
        let priv_key =
            OsslCrypto::priv_key_from_pem_bytes(SUBJECT_KEY_PRIVATE_PEM.as_bytes()).unwrap();
        let pub_key = crypto.rsa_pub_key(&priv_key).unwrap();
        for alg in HashAlgorithm::ALL {
            let sig = crypto.rsa_sign(&ctx(alg), b"manifest", &priv_key).unwrap();
            assert!(crypto.rsa_verify(&ctx(alg), b"manifest", &pub_key, &sig).unwrap());
            assert!(!crypto.rsa_verify(&ctx(alg), b"manifesT", &pub_key, &sig).unwrap());

            let mut bad_sig = sig;
            bad_sig[10] ^= 0x01;
            assert!(!crypto.rsa_verify(&ctx(alg), b"manifest", &pub_key, &bad_sig).unwrap());
        }

        let sig = crypto
            .rsa_sign(&ctx(HashAlgorithm::Sha256), b"manifest", &priv_key)
            .unwrap();
        assert!(!crypto
            .rsa_verify(&ctx(HashAlgorithm::Sha512), b"manifest", &pub_key, &sig)
            .unwrap());
    }

    #[test]
    fn test_read_pem_missing_file() {
        let result = OsslCrypto::rsa_priv_key_from_pem(Path::new("no/such/key.pem"));
        match result {
            Err(SiipError::Io { path, .. }) => assert_eq!(path, Path::new("no/such/key.pem")),
            _ => panic!("expected I/O error"),
        }
    }
}
