//! Content fingerprints for source documents.
//!
//! A fingerprint is the lowercase hex SHA-256 of the file bytes. It depends
//! on content only, never on path or filesystem metadata, so two copies of
//! the same PDF anywhere on disk share one fingerprint.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

/// Hash a reader in bounded chunks.
pub fn fingerprint_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    fingerprint_reader(File::open(path)?)
}
