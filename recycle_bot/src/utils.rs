//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::Client;

use crate::error::StartupError;

/// Download a file from a URL to a given filepath.
///
/// The target path either ends up with the complete body or stays
/// untouched: the body is read in full first, written to a `.part`
/// sibling and renamed into place. A failure on any step must not leave
/// a truncated file where callers check for a cached one.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<Path>,
) -> anyhow::Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;
    let content = resp.bytes().await?;

    let partial = partial_path(filepath.as_ref());
    let mut file = File::create(&partial)?;
    if let Err(err) = std::io::copy(&mut Cursor::new(&content), &mut file) {
        drop(file);
        let _ = std::fs::remove_file(&partial);
        return Err(err.into());
    }
    std::fs::rename(&partial, filepath.as_ref())?;

    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Download with a bounded number of attempts, doubling the wait in
/// between.
pub async fn download_with_backoff(
    client: &Client,
    url: &str,
    filepath: impl AsRef<Path>,
    attempts: u32,
) -> Result<(), StartupError> {
    let mut delay = Duration::from_millis(500);
    let mut last_err = String::new();

    for attempt in 1..=attempts {
        match download_file(client, url, filepath.as_ref()).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                log::warn!("Download attempt {attempt}/{attempts} failed: {err}");
                last_err = err.to_string();
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(StartupError::Load(format!("{url}: {last_err}")))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_downloads_use_a_sibling_path() {
        assert_eq!(
            partial_path(Path::new("/tmp/recycle_bot/model.onnx")),
            PathBuf::from("/tmp/recycle_bot/model.onnx.part")
        );
    }

    #[tokio::test]
    async fn failed_download_leaves_no_cache_file() {
        let client = Client::new();
        let target = std::env::temp_dir().join("recycle_bot_failed_download.onnx");
        let _ = std::fs::remove_file(&target);

        // Nothing listens on the discard port, so the fetch must fail.
        let result = download_file(&client, "http://127.0.0.1:9/model.onnx", &target).await;

        assert!(result.is_err());
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }
}
