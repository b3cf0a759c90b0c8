use crate::card;
use crate::config::Config;
use crate::storage;
use crate::thumbnails;
use crate::transform::{self, CropSpec};
use anyhow::{Context, Result, bail};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task;
use tracing::{info, warn};

pub enum AvatarInput {
    Upload(PathBuf),
    #[allow(dead_code)]
    Buffer(Bytes),
}

pub enum MetadataSource {
    Supplied(String),
    FromExisting,
}

pub async fn replace_avatar(
    config: &Arc<Config>,
    avatar_name: &str,
    input: AvatarInput,
    metadata: MetadataSource,
    crop: Option<CropSpec>,
) -> Result<()> {
    let staged = match &input {
        AvatarInput::Upload(path) => Some(path.clone()),
        AvatarInput::Buffer(_) => None,
    };
    let result = replace_inner(config, avatar_name, input, metadata, crop).await;
    if let Some(path) = staged {
        if let Err(err) = tokio::fs::remove_file(&path).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(error = ?err, path = %path.display(), "staged upload not removed");
            }
        }
    }
    result
}

async fn replace_inner(
    config: &Arc<Config>,
    avatar_name: &str,
    input: AvatarInput,
    metadata: MetadataSource,
    crop: Option<CropSpec>,
) -> Result<()> {
    let target = storage::character_path(config, avatar_name);
    let exists = tokio::fs::try_exists(&target)
        .await
        .context("probe avatar path")?;
    if !exists {
        bail!("avatar {avatar_name} does not exist");
    }

    thumbnails::invalidate_avatar(&config.thumbnails_dir, avatar_name).await;

    let metadata = match metadata {
        MetadataSource::Supplied(text) => text,
        MetadataSource::FromExisting => {
            let existing = tokio::fs::read(&target)
                .await
                .context("read existing avatar")?;
            card::extract_metadata(&existing)
                .context("existing avatar carries no character data")?
        }
    };

    let image = match input {
        AvatarInput::Upload(path) => {
            let config = Arc::clone(config);
            task::spawn_blocking(move || transform::transform_file(&path, crop, &config))
                .await
                .context("image task halted")??
        }
        AvatarInput::Buffer(buffer) => {
            let config = Arc::clone(config);
            task::spawn_blocking(move || transform::transform_buffer(&buffer, crop, &config))
                .await
                .context("image task halted")??
        }
    };

    let card_bytes = card::embed_metadata(&image, &metadata).context("embed character data")?;
    storage::atomic_write(&target, &card_bytes)
        .await
        .context("persist avatar")?;
    info!(avatar = avatar_name, bytes = card_bytes.len(), "avatar replaced");
    Ok(())
}
