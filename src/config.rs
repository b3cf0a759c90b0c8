use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub characters_dir: PathBuf,
    pub thumbnails_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub avatar_width: u32,
    pub avatar_height: u32,
    pub max_decoded_pixels: u64,
    pub max_download_bytes: usize,
    pub max_upload_bytes: usize,
    pub max_in_flight_requests: usize,
    pub download_timeout: Duration,
    pub whitelist_hosts: Vec<String>,
    pub chub_api_base: String,
    pub janny_api_base: String,
    pub pygmalion_api_base: String,
    pub aicc_api_base: String,
    pub risu_api_base: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_u16("PORT", 8080);
        let data_dir = PathBuf::from(
            env::var("DATA_DIR").unwrap_or_else(|_| "/var/lib/cardgate".to_string()),
        );
        let characters_dir = data_dir.join("characters");
        let thumbnails_dir = data_dir.join("thumbnails");
        let uploads_dir = data_dir.join("uploads");
        let avatar_width = parse_u32("AVATAR_WIDTH", 400).max(1);
        let avatar_height = parse_u32("AVATAR_HEIGHT", 600).max(1);
        let max_decoded_pixels = parse_u64("MAX_DECODED_PIXELS", 64_000_000).max(1);
        let max_download_bytes = parse_usize("MAX_DOWNLOAD_BYTES", 64 * 1024 * 1024).max(1);
        let max_upload_bytes = parse_usize("MAX_UPLOAD_BYTES", 50 * 1024 * 1024).max(1);
        let max_in_flight_requests = parse_usize("MAX_IN_FLIGHT_REQUESTS", 512).max(1);
        let download_timeout =
            Duration::from_secs(parse_u64("DOWNLOAD_TIMEOUT_SECONDS", 30).max(1));
        let whitelist_hosts =
            parse_list_env("WHITELIST_HOSTS").unwrap_or_else(default_whitelist_hosts);
        let chub_api_base = parse_base_url("CHUB_API_BASE", "https://api.chub.ai");
        let janny_api_base = parse_base_url("JANNY_API_BASE", "https://api.jannyai.com");
        let pygmalion_api_base =
            parse_base_url("PYGMALION_API_BASE", "https://server.pygmalion.chat");
        let aicc_api_base = parse_base_url("AICC_API_BASE", "https://aicharactercards.com");
        let risu_api_base = parse_base_url("RISU_API_BASE", "https://realm.risuai.net");

        Ok(Self {
            host,
            port,
            characters_dir,
            thumbnails_dir,
            uploads_dir,
            avatar_width,
            avatar_height,
            max_decoded_pixels,
            max_download_bytes,
            max_upload_bytes,
            max_in_flight_requests,
            download_timeout,
            whitelist_hosts,
            chub_api_base,
            janny_api_base,
            pygmalion_api_base,
            aicc_api_base,
            risu_api_base,
        })
    }
}

fn default_whitelist_hosts() -> Vec<String> {
    [
        "localhost",
        "cdn.discordapp.com",
        "files.catbox.moe",
        "raw.githubusercontent.com",
    ]
    .iter()
    .map(|host| host.to_string())
    .collect()
}

fn parse_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_base_url(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_list_env(key: &str) -> Option<Vec<String>> {
    let raw = env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(trimmed)
            .ok()
            .filter(|list| !list.is_empty());
    }
    let list: Vec<String> = trimmed
        .split(',')
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect();
    if list.is_empty() { None } else { Some(list) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn with_env_lock<T>(run: impl FnOnce() -> T) -> T {
        let lock = ENV_LOCK.get_or_init(|| Mutex::new(()));
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        run()
    }

    #[test]
    fn defaults_apply_without_env() {
        with_env_lock(|| {
            for key in [
                "HOST",
                "PORT",
                "DATA_DIR",
                "AVATAR_WIDTH",
                "AVATAR_HEIGHT",
                "WHITELIST_HOSTS",
                "CHUB_API_BASE",
                "DOWNLOAD_TIMEOUT_SECONDS",
            ] {
                unsafe { env::remove_var(key) };
            }
            let config = Config::from_env().unwrap();
            assert_eq!(config.port, 8080);
            assert_eq!(config.avatar_width, 400);
            assert_eq!(config.avatar_height, 600);
            assert_eq!(config.chub_api_base, "https://api.chub.ai");
            assert_eq!(config.download_timeout, Duration::from_secs(30));
            assert!(config.whitelist_hosts.contains(&"files.catbox.moe".to_string()));
            assert!(config.characters_dir.ends_with("characters"));
        });
    }

    #[test]
    fn whitelist_accepts_comma_list_and_json() {
        with_env_lock(|| {
            unsafe { env::set_var("WHITELIST_HOSTS", "a.example, b.example ,") };
            let config = Config::from_env().unwrap();
            assert_eq!(config.whitelist_hosts, vec!["a.example", "b.example"]);

            unsafe { env::set_var("WHITELIST_HOSTS", r#"["c.example","d.example"]"#) };
            let config = Config::from_env().unwrap();
            assert_eq!(config.whitelist_hosts, vec!["c.example", "d.example"]);

            unsafe { env::remove_var("WHITELIST_HOSTS") };
        });
    }

    #[test]
    fn api_base_trims_trailing_slash() {
        with_env_lock(|| {
            unsafe { env::set_var("CHUB_API_BASE", "http://127.0.0.1:9999/") };
            let config = Config::from_env().unwrap();
            assert_eq!(config.chub_api_base, "http://127.0.0.1:9999");
            unsafe { env::remove_var("CHUB_API_BASE") };
        });
    }

    #[test]
    fn malformed_numbers_fall_back_to_defaults() {
        with_env_lock(|| {
            unsafe { env::set_var("PORT", "not-a-port") };
            unsafe { env::set_var("DOWNLOAD_TIMEOUT_SECONDS", "0") };
            let config = Config::from_env().unwrap();
            assert_eq!(config.port, 8080);
            assert_eq!(config.download_timeout, Duration::from_secs(1));
            unsafe { env::remove_var("PORT") };
            unsafe { env::remove_var("DOWNLOAD_TIMEOUT_SECONDS") };
        });
    }
}
