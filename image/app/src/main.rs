/*++

Licensed under the Apache-2.0 license.

File Name:

   main.rs

Abstract:

    Main entry point SIIP signing application

--*/
use std::path::PathBuf;

use clap::{arg, crate_version, value_parser, Arg, ArgMatches, Command};
use siip_error::SiipError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod create;
mod decompose;
mod output;
mod verify;

const HASH_CHOICES: [&str; 3] = ["sha256", "sha384", "sha512"];

fn hash_option() -> Arg {
    arg!(-s --"hash-option" <ALG> "Hashing algorithm")
        .required(false)
        .default_value("sha256")
        .value_parser(HASH_CHOICES)
}

fn config_option() -> Arg {
    arg!(--"config" <FILE> "Manifest configuration file")
        .required(false)
        .value_parser(value_parser!(PathBuf))
}

fn cli() -> Command {
    let sub_cmds = vec![
        Command::new("sign")
            .about("Sign an image")
            .arg(
                arg!(-i --"input-file" <FILE> "Input file[,FBM signing key]")
                    .required(true)
                    .value_parser(value_parser!(String)),
            )
            .arg(
                arg!(-o --"output-file" <FILE> "Output signed file")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(-k --"private-key" <FILE> "RSA key in PEM format signing the key manifest")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"subject-key" <FILE> "RSA key in PEM format signing the blob manifest")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"fkm-out" <FILE> "Also write the key manifest partition to this file")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(hash_option())
            .arg(config_option()),
        Command::new("verify")
            .about("Verify a signed image")
            .arg(
                arg!(-i --"input-file" <FILE> "Signed image[,FBM public key]")
                    .required(true)
                    .value_parser(value_parser!(String)),
            )
            .arg(
                arg!(-p --"pubkey-pem-file" <FILE> "Trusted public key in PEM format")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"subject-key" <FILE> "Expected blob manifest public key in PEM format")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(hash_option()),
        Command::new("decompose")
            .about("Decompose a signed image")
            .arg(
                arg!(-i --"input-file" <FILE> "Input signed image")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"out-dir" <DIR> "Directory receiving the extracted parts")
                    .required(false)
                    .default_value("extract")
                    .value_parser(value_parser!(PathBuf)),
            ),
        Command::new("fkmgen")
            .about("Generate a key manifest partition")
            .arg(
                arg!(-k --"private-key" <FILE> "RSA key in PEM format signing the key manifest")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(-p --"pubkey-pem-file" <FILE> "Public key in PEM format to authorize")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(-o --"output-file" <FILE> "Output key manifest partition")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(hash_option())
            .arg(config_option()),
        Command::new("fkmcheck")
            .about("Verify a key manifest partition")
            .arg(
                arg!(-i --"input-file" <FILE> "Input key manifest partition")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(-p --"pubkey-pem-file" <FILE> "Trusted public key in PEM format")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(-t --"target-pubkey" <FILE> "Public key in PEM format to check")
                    .required(false)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(hash_option()),
    ];

    Command::new("siip-sign")
        .version(crate_version!())
        .arg_required_else_help(true)
        .subcommand_required(true)
        .arg(
            arg!(--"log-level" <FILTER> "Log filter, e.g. info or debug")
                .required(false)
                .global(true)
                .default_value("info")
                .value_parser(value_parser!(String)),
        )
        .subcommands(sub_cmds)
        .about("SIIP firmware manifest signing tool")
}

fn run(cmd: &ArgMatches) -> anyhow::Result<()> {
    match cmd.subcommand() {
        Some(("sign", args)) => create::run_cmd(args),
        Some(("fkmgen", args)) => create::run_fkmgen(args),
        Some(("verify", args)) => verify::run_cmd(args),
        Some(("fkmcheck", args)) => verify::run_fkmcheck(args),
        Some(("decompose", args)) => decompose::run_cmd(args),
        _ => unreachable!(),
    }
}

/// Entry point
fn main() {
    // Usage errors exit with status 2
    let cmd = cli().get_matches();

    let log_level = cmd
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(err) = run(&cmd) {
        eprintln!("Error: {err:#}");
        if let Some(artifact) = err.downcast_ref::<SiipError>().and_then(SiipError::artifact) {
            eprintln!("Failed check: {artifact}");
        }
        std::process::exit(1);
    }
}
