// Licensed under the Apache-2.0 license

use std::{
    fs,
    path::PathBuf,
    process::{Command, Output},
};

use siip_image_fake_keys::*;
use tempfile::TempDir;

const PROGRAM_BIN: &str = env!("CARGO_BIN_EXE_siip-sign");

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let ws = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        ws.write("issuer.pem", ISSUER_KEY_PRIVATE_PEM.as_bytes());
        ws.write("issuer.pub.pem", ISSUER_KEY_PUBLIC_PEM.as_bytes());
        ws.write("subject.pem", SUBJECT_KEY_PRIVATE_PEM.as_bytes());
        ws.write("subject.pub.pem", SUBJECT_KEY_PUBLIC_PEM.as_bytes());
        ws.write("weak.pem", WEAK_KEY_PRIVATE_PEM.as_bytes());
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i * 31 + 7) as u8).collect();
        ws.write("payload.bin", &payload);
        ws
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, contents: &[u8]) {
        fs::write(self.path(name), contents).unwrap();
    }

    fn read(&self, name: &str) -> Vec<u8> {
        fs::read(self.path(name)).unwrap()
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(PROGRAM_BIN)
            .current_dir(self.dir.path())
            .args(args)
            .output()
            .unwrap()
    }
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn sign(ws: &Workspace, extra: &[&str]) -> Output {
    let mut args = vec!["sign", "-i", "payload.bin", "-o", "signed.bin", "-k", "issuer.pem"];
    args.extend_from_slice(extra);
    ws.run(&args)
}

#[test]
fn test_version() {
    let out = Command::new(PROGRAM_BIN).arg("-V").output().unwrap();
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).starts_with("siip-sign "));
}

#[test]
fn test_usage_errors() {
    let ws = Workspace::new();

    let out = ws.run(&[]);
    assert_eq!(out.status.code(), Some(2));

    let out = ws.run(&["sign", "-i", "payload.bin"]);
    assert_eq!(out.status.code(), Some(2));

    let out = sign(&ws, &["-s", "md5"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(!ws.path("signed.bin").exists());
}

#[test]
fn test_sign_verify_decompose() {
    let ws = Workspace::new();

    let out = sign(&ws, &[]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));

    let out = ws.run(&["verify", "-i", "signed.bin", "-p", "issuer.pub.pem"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert!(stdout(&out).starts_with("Verification OK (sha256)"));

    let out = ws.run(&["decompose", "-i", "signed.bin"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert_eq!(ws.read("extract/PAYLOAD.bin"), ws.read("payload.bin"));
    assert_eq!(ws.read("extract/FKM.bin").len(), 780);
    assert_eq!(ws.read("extract/FBM.bin").len(), 784);
    assert_eq!(ws.read("extract/METADATA.bin").len(), 128);

    let out = ws.run(&["decompose", "-i", "signed.bin", "--out-dir", "parts"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert!(ws.path("parts/FBM.bin").exists());
}

#[test]
fn test_two_keys_with_suffix() {
    let ws = Workspace::new();
    let out = ws.run(&[
        "sign",
        "-i",
        "payload.bin,subject.pem",
        "-o",
        "signed.bin",
        "-k",
        "issuer.pem",
        "-s",
        "sha384",
    ]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));

    let out = ws.run(&[
        "verify",
        "-i",
        "signed.bin,subject.pub.pem",
        "-p",
        "issuer.pub.pem",
        "-s",
        "sha384",
    ]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));

    // Subject key is not a trust anchor
    let out = ws.run(&["verify", "-i", "signed.bin", "-p", "subject.pub.pem", "-s", "sha384"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("Failed check: FKM"));

    // Wrong declared algorithm
    let out = ws.run(&["verify", "-i", "signed.bin", "-p", "issuer.pub.pem"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("FKM signature invalid"));

    // Wrong expected subject key
    let out = ws.run(&[
        "verify",
        "-i",
        "signed.bin",
        "-p",
        "issuer.pub.pem",
        "--subject-key",
        "issuer.pub.pem",
        "-s",
        "sha384",
    ]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn test_weak_key_writes_nothing() {
    let ws = Workspace::new();
    let out = ws.run(&[
        "sign", "-i", "payload.bin", "-o", "signed.bin", "-k", "weak.pem",
    ]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("too small"));
    assert!(!ws.path("signed.bin").exists());
}

#[test]
fn test_missing_key_file() {
    let ws = Workspace::new();
    let out = ws.run(&[
        "sign", "-i", "payload.bin", "-o", "signed.bin", "-k", "missing.pem",
    ]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("missing.pem"));
    assert!(!ws.path("signed.bin").exists());
}

#[test]
fn test_tampered_payload() {
    let ws = Workspace::new();
    let out = sign(&ws, &["-s", "sha512"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));

    let mut image = ws.read("signed.bin");
    let last = image.len() - 1;
    image[last] ^= 0x01;
    ws.write("tampered.bin", &image);

    let out = ws.run(&["verify", "-i", "tampered.bin", "-p", "issuer.pub.pem", "-s", "sha512"]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("payload hash mismatch"), "{err}");
    assert!(err.contains("Failed check: PAYLOAD"), "{err}");
}

#[test]
fn test_fkm_out_and_fkmcheck() {
    let ws = Workspace::new();
    let out = sign(&ws, &["--subject-key", "subject.pem", "--fkm-out", "fkm.bin"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));

    let image = ws.read("signed.bin");
    let fkm = ws.read("fkm.bin");
    assert_eq!(fkm.len(), 20 + 24 + 780);
    assert_eq!(&image[..fkm.len()], &fkm[..]);

    let out = ws.run(&[
        "fkmcheck", "-i", "fkm.bin", "-p", "issuer.pub.pem", "-t", "subject.pub.pem",
    ]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));

    let out = ws.run(&[
        "fkmcheck", "-i", "fkm.bin", "-p", "issuer.pub.pem", "-t", "issuer.pub.pem",
    ]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn test_failed_sign_writes_nothing() {
    // A non-empty directory cannot be replaced by the signed image
    let ws = Workspace::new();
    fs::create_dir(ws.path("signed.bin")).unwrap();
    ws.write("signed.bin/keep", b"keep");
    let out = sign(&ws, &["--fkm-out", "fkm.bin"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(!ws.path("fkm.bin").exists());
    assert!(ws.path("signed.bin").is_dir());

    // Nor by the key manifest
    let ws = Workspace::new();
    fs::create_dir(ws.path("fkm.bin")).unwrap();
    ws.write("fkm.bin/keep", b"keep");
    let out = sign(&ws, &["--fkm-out", "fkm.bin"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("fkm.bin"));
    assert!(!ws.path("signed.bin").exists());
}

#[test]
fn test_fkmgen() {
    let ws = Workspace::new();
    let out = ws.run(&[
        "fkmgen",
        "-k",
        "issuer.pem",
        "-p",
        "subject.pub.pem",
        "-o",
        "fkm.bin",
        "-s",
        "sha384",
    ]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));

    let out = ws.run(&[
        "fkmcheck",
        "-i",
        "fkm.bin",
        "-p",
        "issuer.pub.pem",
        "-t",
        "subject.pub.pem",
        "-s",
        "sha384",
    ]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));

    let out = ws.run(&["decompose", "-i", "fkm.bin"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));
    assert_eq!(ws.read("extract/FKM.bin").len(), 780);
}

#[test]
fn test_manifest_config() {
    let ws = Workspace::new();
    ws.write(
        "manifest.toml",
        b"date = 0x20200601\nsvn = 5\nkey_manifest_svn = 2\n",
    );
    let out = sign(&ws, &["--config", "manifest.toml"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));

    let out = ws.run(&["decompose", "-i", "signed.bin"]);
    assert_eq!(out.status.code(), Some(0), "{}", stderr(&out));

    let fkm = ws.read("extract/FKM.bin");
    let fbm = ws.read("extract/FBM.bin");
    assert_eq!(read_u32(&fkm, 20), 0x2020_0601);
    assert_eq!(read_u32(&fkm, 656), 2);
    assert_eq!(read_u32(&fbm, 680), 5);

    ws.write("bad.toml", b"svn = \"five\"\n");
    let out = sign(&ws, &["--config", "bad.toml"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("bad.toml"));
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}
