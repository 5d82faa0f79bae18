use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Lowercase hex encoding of a digest.
pub fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// SHA-256 of a file on disk, computed on the blocking pool.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(to_hex(&hasher.finalize()))
    })
    .await
    .map_err(std::io::Error::other)?
}
