use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Number of bytes in a digest (SHA-256).
pub const CHECKSUM_LEN: usize = 32;

/// Files are streamed through the hasher in chunks of this size. Each chunk
/// is reported to the progress callback before it is hashed.
const CHUNK_SIZE: u64 = 1 << 24;

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Cancelled by user")]
    Cancelled,
    #[error("Wrong checksum size: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Invalid hex checksum: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// A fixed-width content digest. Equality is byte-wise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; CHECKSUM_LEN]);

impl Checksum {
    /// Builds a checksum from its raw binary form (as stored in the database).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChecksumError> {
        let digest: [u8; CHECKSUM_LEN] =
            bytes
                .try_into()
                .map_err(|_| ChecksumError::InvalidLength {
                    expected: CHECKSUM_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Checksum(digest))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parses the 64 character lowercase or uppercase hex form.
    pub fn from_hex(hex_str: &str) -> Result<Self, ChecksumError> {
        if hex_str.len() != 2 * CHECKSUM_LEN {
            return Err(ChecksumError::InvalidLength {
                expected: 2 * CHECKSUM_LEN,
                actual: hex_str.len(),
            });
        }
        let bytes = hex::decode(hex_str)?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First four bytes in hex, for compact listings.
    pub fn abbreviated(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Computes the SHA-256 checksum of a file without progress reporting.
    pub fn of_file(path: &Path) -> Result<Self, ChecksumError> {
        Self::calculate_for_file(path, |_| ControlFlow::Continue(()))
    }

    /// Computes the SHA-256 checksum of a file.
    ///
    /// The file is read in 16 MiB chunks. After each chunk is read and before
    /// it is hashed, `on_bytes_done` is called with the chunk length. If it
    /// returns `ControlFlow::Break`, hashing stops and `ChecksumError::Cancelled`
    /// is returned without touching the remaining data.
    ///
    /// # Errors
    /// - `ChecksumError::Io`: File doesn't exist or other I/O errors
    /// - `ChecksumError::PermissionDenied`: Insufficient permissions to read the file
    /// - `ChecksumError::Cancelled`: The callback requested cancellation
    pub fn calculate_for_file<F>(path: &Path, mut on_bytes_done: F) -> Result<Self, ChecksumError>
    where
        F: FnMut(u64) -> ControlFlow<()>,
    {
        info!("Checksumming {}", path.display());

        let mut file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ChecksumError::PermissionDenied(path.to_path_buf())
            } else {
                ChecksumError::Io(e)
            }
        })?;

        let mut hasher = Sha256::new();
        let mut buffer = Vec::new();

        loop {
            buffer.clear();
            let bytes_read = (&mut file)
                .take(CHUNK_SIZE)
                .read_to_end(&mut buffer)
                .map_err(ChecksumError::Io)?;
            if bytes_read == 0 {
                break;
            }
            if on_bytes_done(bytes_read as u64).is_break() {
                debug!("Checksumming of {} cancelled", path.display());
                return Err(ChecksumError::Cancelled);
            }
            hasher.update(&buffer);
        }

        let mut digest = [0u8; CHECKSUM_LEN];
        digest.copy_from_slice(&hasher.finalize());
        let checksum = Checksum(digest);

        debug!("Checksum of {} is {}", path.display(), checksum);

        Ok(checksum)
    }

    /// Writes the hex form to a plain-text sidecar file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ChecksumError> {
        std::fs::write(path, self.to_hex()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ChecksumError::PermissionDenied(path.to_path_buf())
            } else {
                ChecksumError::Io(e)
            }
        })
    }

    /// Compares against a sidecar file written by `save_to_file`.
    ///
    /// A mismatch is not an error; the caller decides how severe it is.
    pub fn load_and_verify_against_file(&self, path: &Path) -> Result<bool, ChecksumError> {
        let saved = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ChecksumError::PermissionDenied(path.to_path_buf())
            } else {
                ChecksumError::Io(e)
            }
        })?;
        Ok(saved == self.to_hex())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl FromStr for Checksum {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
