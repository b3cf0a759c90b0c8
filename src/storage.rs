use crate::config::Config;
use crate::thumbnails;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const MAX_FILE_NAME_LEN: usize = 128;

pub fn ensure_dirs(config: &Config) -> Result<()> {
    std::fs::create_dir_all(&config.characters_dir).context("create characters dir")?;
    std::fs::create_dir_all(config.thumbnails_dir.join(thumbnails::AVATAR_SUBDIR))
        .context("create thumbnails dir")?;
    std::fs::create_dir_all(&config.uploads_dir).context("create uploads dir")?;
    Ok(())
}

pub fn sanitize_file_name(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ' ') {
            out.push(ch);
        } else {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches(|ch| matches!(ch, '-' | ' ' | '.'));
    let mut name = trimmed.to_string();
    if name.len() > MAX_FILE_NAME_LEN {
        name.truncate(MAX_FILE_NAME_LEN);
    }
    if name.is_empty() { "card".to_string() } else { name }
}

pub fn character_path(config: &Config, avatar_name: &str) -> PathBuf {
    config.characters_dir.join(sanitize_file_name(avatar_name))
}

pub async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent)
        .await
        .context("create target dir")?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("avatar");
    let temp_path = parent.join(format!(".{file_name}.tmp-{}", clock_nonce()));
    if let Err(err) = tokio::fs::write(&temp_path, bytes).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err).context("write temp file");
    }
    if let Err(err) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err).context("rename temp file into place");
    }
    Ok(())
}

pub async fn stage_upload(config: &Config, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(&config.uploads_dir)
        .await
        .context("create uploads dir")?;
    let path = config
        .uploads_dir
        .join(format!("upload-{}.tmp", clock_nonce()));
    tokio::fs::write(&path, bytes)
        .await
        .context("stage upload")?;
    Ok(path)
}

fn clock_nonce() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or(0)
}
