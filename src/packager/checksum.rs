//! Artifact checksums for descriptor entries.
//!
//! Descriptors carry SHA-1 digests written as space separated hex pairs
//! (`5e 2b 0a ...`).

use super::error::{ErrorExt, Result};
use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::Path;

/// Calculates the SHA-1 of a file, reading it in 8KB chunks.
pub fn sha1_digest(path: &Path) -> Result<[u8; 20]> {
    let mut file = std::fs::File::open(path).fs_context("opening file for hashing", path)?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file
            .read(&mut buffer)
            .fs_context("reading file for hash calculation", path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().into())
}

/// SHA-1 of a file in descriptor notation.
pub fn descriptor_sha1(path: &Path) -> Result<String> {
    Ok(hex_pairs(&sha1_digest(path)?))
}

fn hex_pairs(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_in_pair_notation() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("abc.cod");
        std::fs::write(&file, b"abc").unwrap();
        assert_eq!(
            descriptor_sha1(&file).unwrap(),
            "a9 99 3e 36 47 06 81 6a ba 3e 25 71 78 50 c2 6c 9c d0 d8 9d"
        );
    }
}
