/// Reference-answer digests for tamper detection
use crate::config::types::{HarnessError, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// SHA-256 digest of a reference answer, captured before the candidate runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceChecksum {
    path: PathBuf,
    digest: String,
}

impl ReferenceChecksum {
    pub fn capture(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            digest: sha256_file(path)?,
        })
    }

    /// Recompute the digest and fail with a tamper signal on any change
    pub fn verify(&self) -> Result<()> {
        let current = sha256_file(&self.path).map_err(|_| HarnessError::Tampered {
            path: self.path.clone(),
        })?;
        if current != self.digest {
            return Err(HarnessError::Tampered {
                path: self.path.clone(),
            });
        }
        Ok(())
    }
}

/// Lowercase hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        HarnessError::Io(io::Error::new(
            e.kind(),
            format!("Failed to open {}: {}", path.display(), e),
        ))
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001.ans");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_unchanged_file_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001.ans");
        std::fs::write(&path, b"0\n").unwrap();
        let checksum = ReferenceChecksum::capture(&path).unwrap();
        assert!(checksum.verify().is_ok());
    }

    #[test]
    fn test_mutation_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001.ans");
        std::fs::write(&path, b"0\n").unwrap();
        let checksum = ReferenceChecksum::capture(&path).unwrap();

        std::fs::write(&path, b"1\n").unwrap();
        let err = checksum.verify().unwrap_err();
        assert!(matches!(err, HarnessError::Tampered { .. }));
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn test_deletion_is_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001.ans");
        std::fs::write(&path, b"0\n").unwrap();
        let checksum = ReferenceChecksum::capture(&path).unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(checksum.verify(), Err(HarnessError::Tampered { .. })));
    }
}
