use std::path::Path;

use super::error::IndexError;

const LOCK_FILE: &str = "index.lock";

/// Exclusive advisory lock on a state directory, held for the lifetime of
/// the value. Two runs sharing one index would race on the same files.
#[derive(Debug)]
pub struct IndexLock {
    _file: std::fs::File,
}

impl IndexLock {
    pub async fn acquire(state_dir: &Path) -> Result<Self, IndexError> {
        let path = state_dir.join(LOCK_FILE);
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            fs4::fs_std::FileExt::try_lock_exclusive(&file)
                .map_err(|_| IndexError::Locked(path.clone()))?;
            tracing::debug!(path = %path.display(), "Acquired index lock");
            Ok(Self { _file: file })
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_lock_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let first = IndexLock::acquire(dir.path()).await.unwrap();
        assert!(dir.path().join(LOCK_FILE).exists());
        assert!(matches!(
            IndexLock::acquire(dir.path()).await,
            Err(IndexError::Locked(_))
        ));
        drop(first);
        IndexLock::acquire(dir.path()).await.unwrap();
    }
}
