use crate::storage::sanitize_file_name;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

pub const AVATAR_SUBDIR: &str = "avatar";

pub async fn invalidate_avatar(thumbnails_dir: &Path, avatar_name: &str) {
    let path = thumbnails_dir
        .join(AVATAR_SUBDIR)
        .join(sanitize_file_name(avatar_name));
    match tokio::fs::remove_file(&path).await {
        Ok(()) => debug!(path = %path.display(), "thumbnail invalidated"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            warn!(error = ?err, path = %path.display(), "thumbnail invalidation failed");
        }
    }
}
