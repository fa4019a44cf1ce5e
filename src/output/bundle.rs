//! Artifact bundling and archive encryption
//!
//! Collects a job's output files into `job_<id>.zip`. When the request
//! carries an encryption password the zip bytes are sealed with
//! AES-256-GCM under a PBKDF2-HMAC-SHA256 key (100k iterations, random
//! per-archive salt); the artifact header is `magic || salt || nonce ||
//! ciphertext` and the plaintext zip is removed.

use super::OutputError;
use crate::config::defaults;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Header magic for encrypted archives
const MAGIC: &[u8; 5] = b"CGEN1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Bundle `files` (relative to `dir`) into `job_<id>.zip` inside `dir`.
/// Returns the bundle filename.
pub fn bundle_job(dir: &Path, job_id: &str, files: &[String]) -> Result<String, OutputError> {
    let bundle_name = format!("job_{job_id}.zip");
    let bundle_path = dir.join(&bundle_name);
    let mut zip = ZipWriter::new(File::create(&bundle_path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut buf = Vec::new();
    for name in files {
        let mut source = File::open(dir.join(name))?;
        buf.clear();
        source.read_to_end(&mut buf)?;
        zip.start_file(name.as_str(), options)
            .map_err(|e| OutputError::Bundle(e.to_string()))?;
        zip.write_all(&buf)?;
    }
    zip.finish().map_err(|e| OutputError::Bundle(e.to_string()))?;
    Ok(bundle_name)
}

/// Seal a bundle with a password. Consumes the plaintext zip and returns
/// the encrypted artifact filename.
pub fn encrypt_bundle(
    dir: &Path,
    bundle_name: &str,
    password: &str,
) -> Result<String, OutputError> {
    let plaintext = std::fs::read(dir.join(bundle_name))?;

    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
        .map_err(|e| OutputError::Encryption(e.to_string()))?;

    let sealed_name = format!("{bundle_name}.enc");
    let mut out = File::create(dir.join(&sealed_name))?;
    out.write_all(MAGIC)?;
    out.write_all(&salt)?;
    out.write_all(&nonce_bytes)?;
    out.write_all(&ciphertext)?;
    out.flush()?;

    std::fs::remove_file(dir.join(bundle_name))?;
    Ok(sealed_name)
}

/// Open a sealed archive back into zip bytes. Used by tests and offline
/// tooling; the download path streams the sealed artifact as-is.
pub fn decrypt_bundle(path: &Path, password: &str) -> Result<Vec<u8>, OutputError> {
    let raw = std::fs::read(path)?;
    if raw.len() < MAGIC.len() + SALT_LEN + NONCE_LEN || &raw[..MAGIC.len()] != MAGIC {
        return Err(OutputError::Encryption("not a sealed archive".to_string()));
    }
    let salt = &raw[MAGIC.len()..MAGIC.len() + SALT_LEN];
    let nonce = &raw[MAGIC.len() + SALT_LEN..MAGIC.len() + SALT_LEN + NONCE_LEN];
    let ciphertext = &raw[MAGIC.len() + SALT_LEN + NONCE_LEN..];

    let key = derive_key(password, salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| OutputError::Encryption("wrong password or corrupt archive".to_string()))
}

fn derive_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt,
        defaults::KDF_ITERATIONS,
        &mut key,
    );
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_contains_all_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("patients.json"), b"[]").unwrap();
        std::fs::write(dir.path().join("patients.csv"), b"id\n").unwrap();

        let name = bundle_job(
            dir.path(),
            "abc",
            &["patients.json".to_string(), "patients.csv".to_string()],
        )
        .unwrap();
        assert_eq!(name, "job_abc.zip");

        let reader = File::open(dir.path().join(&name)).unwrap();
        let mut archive = zip::ZipArchive::new(reader).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.by_name("patients.json").is_ok());
    }

    #[test]
    fn sealed_bundle_round_trips_with_password() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("patients.json"), b"[{\"id\":1}]").unwrap();
        let bundle = bundle_job(dir.path(), "xyz", &["patients.json".to_string()]).unwrap();
        let original = std::fs::read(dir.path().join(&bundle)).unwrap();

        let sealed = encrypt_bundle(dir.path(), &bundle, "hunter2hunter2").unwrap();
        assert_eq!(sealed, "job_xyz.zip.enc");
        assert!(!dir.path().join(&bundle).exists(), "plaintext zip remains");

        let opened = decrypt_bundle(&dir.path().join(&sealed), "hunter2hunter2").unwrap();
        assert_eq!(opened, original);
    }

    #[test]
    fn wrong_password_fails_decryption() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("patients.json"), b"[]").unwrap();
        let bundle = bundle_job(dir.path(), "k", &["patients.json".to_string()]).unwrap();
        let sealed = encrypt_bundle(dir.path(), &bundle, "correcthorse").unwrap();
        assert!(decrypt_bundle(&dir.path().join(&sealed), "batterystaple").is_err());
    }
}
