use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::detection::domain::model_variant::ModelAsset;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} was interrupted: {source}")]
    Interrupted {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Return the cached copy of `asset` in `cache_dir`, downloading it first
/// if it is not there yet.
pub fn resolve(
    asset: &ModelAsset,
    cache_dir: &Path,
    progress: Option<&ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    let cached_path = cache_dir.join(asset.name);
    if cached_path.exists() {
        log::debug!("Using cached {}", cached_path.display());
        return Ok(cached_path);
    }

    fs::create_dir_all(cache_dir).map_err(|e| ModelResolveError::CacheDir {
        path: cache_dir.to_path_buf(),
        source: e,
    })?;
    log::info!("Downloading {} to {}", asset.url, cached_path.display());
    download(asset.url, &cached_path, progress)?;
    Ok(cached_path)
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/BlazeFace/models/`
/// - Linux: `$XDG_CACHE_HOME/BlazeFace/models/` or `~/.cache/BlazeFace/models/`
/// - Windows: `%LOCALAPPDATA%/BlazeFace/models/`
pub fn default_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join("BlazeFace").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join("BlazeFace").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

fn download(url: &str, dest: &Path, progress: Option<&ProgressFn>) -> Result<(), ModelResolveError> {
    let part = dest.with_extension("part");

    let fetched = stream_to_file(url, &part, progress).and_then(|bytes| {
        fs::rename(&part, dest).map_err(|source| ModelResolveError::Write {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(bytes)
    });

    match fetched {
        Ok(bytes) => {
            log::debug!("Downloaded {bytes} bytes from {url}");
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&part);
            Err(e)
        }
    }
}

/// Stream the body of `url` into `part`, returning the byte count.
fn stream_to_file(
    url: &str,
    part: &Path,
    progress: Option<&ProgressFn>,
) -> Result<u64, ModelResolveError> {
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|source| ModelResolveError::Download {
            url: url.to_string(),
            source,
        })?;
    let total = response.content_length().unwrap_or(0);

    let write_error = |source: std::io::Error| ModelResolveError::Write {
        path: part.to_path_buf(),
        source,
    };
    let interrupted = |source: std::io::Error| ModelResolveError::Interrupted {
        url: url.to_string(),
        source,
    };

    let mut file = fs::File::create(part).map_err(write_error)?;
    let mut buf = vec![0u8; 1024 * 1024];
    let mut downloaded: u64 = 0;
    loop {
        let n = response.read(&mut buf).map_err(interrupted)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_error)?;
        downloaded += n as u64;
        if let Some(cb) = progress {
            cb(downloaded, total);
        }
    }
    if total > 0 && downloaded < total {
        return Err(interrupted(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("received {downloaded} of {total} bytes"),
        )));
    }
    file.sync_all().map_err(write_error)?;
    Ok(downloaded)
}
