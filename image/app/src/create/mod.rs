/*++

Licensed under the Apache-2.0 license.

File Name:

   mod.rs

Abstract:

    File contains implementation of the SIIP image signing commands.

--*/

mod config;

use anyhow::{anyhow, Context};
use clap::ArgMatches;
use siip_image_crypto::{OsslCrypto as Crypto, OsslRsaPrivKey};
use siip_image_gen::*;
use siip_image_serde::{ImageBundleReader, ImageBundleWriter};
use siip_image_types::*;
use std::path::{Path, PathBuf};

use crate::output::{read_file, split_key_suffix, stage_file, write_file, StagedFile};

/// Parse the hash option
pub(crate) fn hash_context(args: &ArgMatches) -> anyhow::Result<HashContext> {
    let hash_option: &String = args
        .get_one::<String>("hash-option")
        .with_context(|| "hash-option arg not specified")?;
    Ok(HashContext::new(hash_option.parse::<HashAlgorithm>()?))
}

/// Manifest configuration from the optional config file
fn manifest_config(args: &ArgMatches) -> anyhow::Result<ManifestConfig> {
    let today = chrono::Local::now().date_naive();
    match args.get_one::<PathBuf>("config") {
        Some(path) => config::load_manifest_config(path)?.manifest_config(today),
        None => config::ManifestFileConfig::default().manifest_config(today),
    }
}

fn load_priv_key(path: &Path) -> anyhow::Result<OsslRsaPrivKey> {
    Crypto::rsa_priv_key_from_pem(path)
        .with_context(|| format!("Failed to load private key {}", path.display()))
}

/// Run the sign command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let input: &String = args
        .get_one::<String>("input-file")
        .with_context(|| "input-file arg not specified")?;

    let out_path: &PathBuf = args
        .get_one::<PathBuf>("output-file")
        .with_context(|| "output-file arg not specified")?;

    let issuer_key_path: &PathBuf = args
        .get_one::<PathBuf>("private-key")
        .with_context(|| "private-key arg not specified")?;

    let (payload_path, suffix_key) = split_key_suffix(input);
    let subject_key_path = match (args.get_one::<PathBuf>("subject-key"), suffix_key) {
        (Some(_), Some(_)) => {
            return Err(anyhow!("Subject key given both with --subject-key and in input-file"))
        }
        (Some(path), None) => Some(path.clone()),
        (None, suffix) => suffix,
    };

    let ctx = hash_context(args)?;
    let manifest = manifest_config(args)?;

    // Keys are checked before anything is written
    tracing::info!("Creating image with manifest data using key {}", issuer_key_path.display());
    let issuer_key = load_priv_key(issuer_key_path)?;
    let subject_key = match &subject_key_path {
        Some(path) => Some(load_priv_key(path)?),
        None => None,
    };

    let payload = read_file(&payload_path)?;

    let gen_config = ImageGeneratorConfig {
        hash: ctx,
        manifest,
        issuer_key: &issuer_key,
        subject_key: subject_key.as_ref().unwrap_or(&issuer_key),
        payload: &payload,
    };

    let gen = ImageGenerator::new(Crypto::default());
    let image = gen.generate(&gen_config)?;

    // Log the layout
    let bytes = image.to_bytes();
    ImageBundleReader::new(&bytes).parts()?;

    let mut staged = StagedFile::new(out_path)?;
    ImageBundleWriter::new(staged.writer())
        .write(&image)
        .with_context(|| format!("Failed to write file {}", out_path.display()))?;

    // Every output is staged before any of them is moved into place
    let fkm_out = match args.get_one::<PathBuf>("fkm-out") {
        Some(fkm_path) => Some((fkm_path, stage_file(fkm_path, &image.fkm_partition)?)),
        None => None,
    };
    staged.persist()?;

    if let Some((fkm_path, fkm_staged)) = fkm_out {
        if let Err(err) = fkm_staged.persist() {
            if let Err(rm_err) = std::fs::remove_file(out_path) {
                tracing::warn!("Failed to remove {}: {}", out_path.display(), rm_err);
            }
            return Err(err.context(format!("Failed to write {}", fkm_path.display())));
        }
    }

    println!("Signed image written to {}", out_path.display());
    Ok(())
}

/// Run the fkmgen command
pub(crate) fn run_fkmgen(args: &ArgMatches) -> anyhow::Result<()> {
    let issuer_key_path: &PathBuf = args
        .get_one::<PathBuf>("private-key")
        .with_context(|| "private-key arg not specified")?;

    let subject_key_path: &PathBuf = args
        .get_one::<PathBuf>("pubkey-pem-file")
        .with_context(|| "pubkey-pem-file arg not specified")?;

    let out_path: &PathBuf = args
        .get_one::<PathBuf>("output-file")
        .with_context(|| "output-file arg not specified")?;

    let ctx = hash_context(args)?;
    let manifest = manifest_config(args)?;

    let issuer_key = load_priv_key(issuer_key_path)?;
    let subject_pub_key = Crypto::rsa_pub_key_from_pem(subject_key_path)
        .with_context(|| format!("Failed to load public key {}", subject_key_path.display()))?;

    let gen = ImageGenerator::new(Crypto::default());
    let partition = gen.generate_fkm_partition(&ctx, &manifest, &issuer_key, &subject_pub_key)?;
    ImageBundleReader::new(&partition).parts()?;

    write_file(out_path, &partition)?;
    println!("Key manifest written to {}", out_path.display());
    Ok(())
}
