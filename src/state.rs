use crate::config::Config;
use crate::download::ContentDownloader;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub downloader: ContentDownloader,
}

impl AppState {
    pub fn new(config: Arc<Config>, downloader: ContentDownloader) -> Self {
        Self { config, downloader }
    }
}
