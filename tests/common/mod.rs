//! Shared fixtures: signed packages, trusted keys and shell-script installers.

#![allow(dead_code)]

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use recovery_installer::InstallConfig;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const INSTALLER_ENTRY: &str = "META-INF/com/google/android/update-binary";

/// Seed of the key every workspace trusts.
pub const TRUSTED_SEED: u8 = 1;

const SIGNATURE_SIZE: usize = 64;
const FOOTER_SIZE: usize = 6;
const COMMENT_SIZE: u16 = (SIGNATURE_SIZE + FOOTER_SIZE) as u16;

const P256_SPKI_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

pub fn public_key_pem(seed: u8) -> String {
    let point = signing_key(seed).verifying_key().to_encoded_point(false);
    let mut der = P256_SPKI_PREFIX.to_vec();
    der.extend_from_slice(point.as_bytes());
    pem::encode(&pem::Pem::new("PUBLIC KEY", der))
}

/// Zip archive of `entries`, signed with the recovery footer convention.
pub fn signed_package(seed: u8, entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    let mut bytes = writer.finish().unwrap().into_inner();

    // Archive written without a comment: its length field is the last two bytes.
    let len = bytes.len();
    assert_eq!(&bytes[len - 2..], &[0, 0]);
    bytes[len - 2..].copy_from_slice(&COMMENT_SIZE.to_le_bytes());

    let signature: Signature = signing_key(seed).sign(&bytes[..len - 2]);
    bytes.extend_from_slice(&signature.to_bytes());
    bytes.extend_from_slice(&COMMENT_SIZE.to_le_bytes());
    bytes.extend_from_slice(&[0xff, 0xff]);
    bytes.extend_from_slice(&COMMENT_SIZE.to_le_bytes());
    bytes
}

/// `/bin/sh` installer whose body can send protocol lines with `say`.
pub fn shell_installer(body: &str) -> Vec<u8> {
    format!(
        "#!/bin/sh\n\
         # $1 api version, $2 control pipe fd, $3 package\n\
         pipe=/proc/self/fd/$2\n\
         say() {{ echo \"$*\" > \"$pipe\"; }}\n\
         {body}\n"
    )
    .into_bytes()
}

/// Scratch directory with a trusted key bundle and a config pointing into it.
pub struct Workspace {
    pub dir: TempDir,
    pub config: InstallConfig,
}

impl Workspace {
    pub fn new() -> Self {
        // Under the target dir: /tmp may be mounted noexec.
        let dir = tempfile::Builder::new()
            .prefix("recovery-install")
            .tempdir_in(env!("CARGO_TARGET_TMPDIR"))
            .unwrap();
        let keys_path = dir.path().join("keys.pem");
        fs::write(&keys_path, public_key_pem(TRUSTED_SEED)).unwrap();

        let config = InstallConfig {
            keys_path,
            installer_path: dir.path().join("update_binary"),
            install_log: dir.path().join("recovery").join("last_install"),
            poll_interval_ms: 50,
            ..InstallConfig::default()
        };
        Self { dir, config }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_package(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    /// Signed package carrying `installer` as its installer entry.
    pub fn package_with_installer(&self, installer: &[u8]) -> PathBuf {
        let bytes = signed_package(
            TRUSTED_SEED,
            &[("system/build.prop", &b"ro.build.id=TEST"[..]), (INSTALLER_ENTRY, installer)],
        );
        self.write_package("update.zip", &bytes)
    }

    pub fn install_log(&self) -> String {
        fs::read_to_string(&self.config.install_log).unwrap()
    }
}

/// Number of descriptors this process has open.
pub fn open_fd_count() -> usize {
    fs::read_dir("/proc/self/fd").unwrap().count()
}
