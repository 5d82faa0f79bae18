use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::download::file::staging_path;

/// Write a comment file unless it already holds `text`.
///
/// Goes through a staging file and a rename like media downloads do.
/// Returns whether the file was (re)written.
pub async fn write_comment(path: &Path, text: &str) -> std::io::Result<bool> {
    match fs::read_to_string(path).await {
        Ok(existing) if existing == text => return Ok(false),
        _ => {}
    }

    let part = staging_path(path);
    let result = async {
        let mut file = fs::File::create(&part).await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&part, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&part).await;
        return Err(e);
    }
    Ok(true)
}
