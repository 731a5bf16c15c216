/*++

Licensed under the Apache-2.0 license.

File Name:

   verify.rs

Abstract:

    File contains implementation of the SIIP image verification commands.

--*/

use anyhow::{anyhow, Context};
use clap::ArgMatches;
use siip_image_crypto::OsslCrypto as Crypto;
use siip_image_gen::ImageGeneratorCrypto;
use siip_image_types::ImageRsaPubKey;
use siip_image_verify::ImageVerifier;
use std::path::{Path, PathBuf};

use crate::create::hash_context;
use crate::output::{read_file, split_key_suffix};

fn load_pub_key(path: &Path) -> anyhow::Result<ImageRsaPubKey> {
    Crypto::rsa_pub_key_from_pem(path)
        .with_context(|| format!("Failed to load public key {}", path.display()))
}

/// Run the verify command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let input: &String = args
        .get_one::<String>("input-file")
        .with_context(|| "input-file arg not specified")?;

    let trusted_key_path: &PathBuf = args
        .get_one::<PathBuf>("pubkey-pem-file")
        .with_context(|| "pubkey-pem-file arg not specified")?;

    let (image_path, suffix_key) = split_key_suffix(input);
    let subject_key_path = match (args.get_one::<PathBuf>("subject-key"), suffix_key) {
        (Some(_), Some(_)) => {
            return Err(anyhow!("Subject key given both with --subject-key and in input-file"))
        }
        (Some(path), None) => Some(path.clone()),
        (None, suffix) => suffix,
    };

    let ctx = hash_context(args)?;
    let trusted_key = load_pub_key(trusted_key_path)?;
    let subject_key = match &subject_key_path {
        Some(path) => Some(load_pub_key(path)?),
        None => None,
    };

    let image = read_file(&image_path)?;

    tracing::info!("Verifying {} ...", image_path.display());
    let verifier = ImageVerifier::new(Crypto::default());
    let info = verifier
        .verify(&image, &ctx, &trusted_key, subject_key.as_ref())
        .with_context(|| format!("Verification of {} failed", image_path.display()))?;

    println!("Verification OK ({})", info.hash);
    println!("  FKM signed by key {}", hex::encode(info.issuer_pub_key_digest.as_bytes()));
    println!("  FBM signed by key {}", hex::encode(info.subject_pub_key_digest.as_bytes()));
    println!(
        "  Payload {} bytes, svn {}, key manifest svn {}",
        info.payload_size, info.svn, info.key_manifest_svn
    );
    Ok(())
}

/// Run the fkmcheck command
pub(crate) fn run_fkmcheck(args: &ArgMatches) -> anyhow::Result<()> {
    let input_path: &PathBuf = args
        .get_one::<PathBuf>("input-file")
        .with_context(|| "input-file arg not specified")?;

    let trusted_key_path: &PathBuf = args
        .get_one::<PathBuf>("pubkey-pem-file")
        .with_context(|| "pubkey-pem-file arg not specified")?;

    let ctx = hash_context(args)?;
    let trusted_key = load_pub_key(trusted_key_path)?;
    let subject_key = match args.get_one::<PathBuf>("target-pubkey") {
        Some(path) => Some(load_pub_key(path)?),
        None => None,
    };

    let partition = read_file(input_path)?;

    let verifier = ImageVerifier::new(Crypto::default());
    let info = verifier
        .verify_fkm(&partition, &ctx, &trusted_key, subject_key.as_ref())
        .with_context(|| format!("Verification of {} failed", input_path.display()))?;

    println!("Key manifest OK ({})", info.hash);
    println!("  Signed by key {}", hex::encode(info.issuer_pub_key_digest.as_bytes()));
    println!("  Authorizes key {}", hex::encode(&info.authorized_key_hash));
    Ok(())
}
