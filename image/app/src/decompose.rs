/*++

Licensed under the Apache-2.0 license.

File Name:

   decompose.rs

Abstract:

    File contains implementation of the SIIP image decompose command.

--*/

use anyhow::{bail, Context};
use clap::ArgMatches;
use siip_image_serde::ImageBundleReader;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::output::{read_file, write_file};

/// Output file name for a directory entry; entry names come from the
/// image and may hold any byte
fn part_file_name(name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '_' | '-' => c,
            _ => '_',
        })
        .collect();
    format!("{name}.bin")
}

/// Output file names for all entries, rejecting names that map to the
/// same file
fn part_file_names<'a>(names: impl IntoIterator<Item = &'a str>) -> anyhow::Result<Vec<String>> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            let file_name = part_file_name(name);
            if !seen.insert(file_name.clone()) {
                bail!("Entry {name:?} collides with another entry as {file_name}");
            }
            Ok(file_name)
        })
        .collect()
}

/// Run the decompose command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let input_path: &PathBuf = args
        .get_one::<PathBuf>("input-file")
        .with_context(|| "input-file arg not specified")?;

    let out_dir: &PathBuf = args
        .get_one::<PathBuf>("out-dir")
        .with_context(|| "out-dir arg not specified")?;

    tracing::info!("Decomposing {} ...", input_path.display());
    let image = read_file(input_path)?;
    let parts = ImageBundleReader::new(&image)
        .parts()
        .with_context(|| format!("Failed to parse {}", input_path.display()))?;

    let file_names = part_file_names(parts.iter().map(|part| part.name.as_str()))?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create directory {}", out_dir.display()))?;

    for (part, file_name) in parts.iter().zip(file_names) {
        let path = out_dir.join(file_name);
        write_file(&path, part.bytes)?;
        println!("{}", path.display());
    }
    Ok(())
}
