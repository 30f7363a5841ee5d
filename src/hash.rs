// src/hash.rs

//! SHA-256 helpers for folder naming and file manifests

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Length of the truncated hash used in cache folder names
pub const SHORT_HASH_LEN: usize = 13;

/// Hex-encoded SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// First 13 hex characters of the SHA-256 of `text`
pub fn short_hash(text: &str) -> String {
    let mut digest = sha256_hex(text.as_bytes());
    digest.truncate(SHORT_HASH_LEN);
    digest
}

/// Hex-encoded SHA-256 of a file's contents, streamed
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
