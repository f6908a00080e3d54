// SPDX-License-Identifier: MPL-2.0

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;
use uuid::Uuid;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "LIVE_BG_DATA_DIR";

const APP_DIR: &str = "live-bg";
const VIDEOS_DIR: &str = "Wallpapers";
const THUMBNAILS_DIR: &str = "Thumbnails";
const DOWNLOADS_DIR: &str = ".downloads";
const DEFAULT_EXTENSION: &str = "mp4";

/// Application data directory holding the library file and managed storage.
pub fn data_root() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    dirs::data_dir().map(|dir| dir.join(APP_DIR))
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `-`.
pub fn sanitize(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect()
}

/// `<sanitized title>-<uuid>.<ext>`, with `mp4` for a missing extension.
pub fn safe_filename(title: &str, ext: &str) -> String {
    let ext = if ext.is_empty() { DEFAULT_EXTENSION } else { ext };
    format!("{}-{}.{}", sanitize(title), Uuid::new_v4(), ext.to_lowercase())
}

/// The application-owned directory of copied and downloaded videos.
///
/// ```text
/// Wallpapers/
/// ├── <title>-<uuid>.<ext>
/// ├── .downloads/<uuid>.part
/// └── Thumbnails/<record id>.png
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedStorage {
    root: PathBuf,
}

impl ManagedStorage {
    /// Storage under `data_root`.
    pub fn new(data_root: &Path) -> Self {
        Self {
            root: data_root.join(VIDEOS_DIR),
        }
    }

    pub fn videos_dir(&self) -> &Path {
        &self.root
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.root.join(THUMBNAILS_DIR)
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join(DOWNLOADS_DIR)
    }

    pub fn thumbnail_path(&self, id: Uuid) -> PathBuf {
        self.thumbnails_dir().join(format!("{id}.png"))
    }

    /// Fresh temporary location for an in-flight download.
    pub fn partial_path(&self) -> io::Result<PathBuf> {
        let dir = self.downloads_dir();
        fs::create_dir_all(&dir)?;
        Ok(dir.join(format!("{}.part", Uuid::new_v4())))
    }

    /// Unique destination for a video named after `title`.
    pub fn destination(&self, title: &str, ext: &str) -> PathBuf {
        self.root.join(safe_filename(title, ext))
    }

    /// Copies `source` into storage. The source file is left untouched.
    pub fn copy_into(&self, source: &Path, title: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;

        let title = if title.trim().is_empty() {
            file_stem(source)
        } else {
            title.to_string()
        };
        let dest = self.destination(&title, &extension(source));

        fs::copy(source, &dest)?;
        debug!(from = %source.display(), to = %dest.display(), "copied video into library");
        Ok(dest)
    }

    /// Moves a finished download into storage under a name derived from `url`.
    pub fn adopt_download(&self, partial: &Path, url: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;

        let name = Path::new(url_file_name(url));
        let dest = self.destination(&file_stem(name), &extension(name));

        if fs::rename(partial, &dest).is_err() {
            // different filesystem
            fs::copy(partial, &dest)?;
            fs::remove_file(partial)?;
        }

        debug!(url, to = %dest.display(), "moved download into library");
        Ok(dest)
    }

    /// Writes the thumbnail for `id`, replacing any previous one.
    pub fn save_thumbnail(&self, id: Uuid, png: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(self.thumbnails_dir())?;

        let path = self.thumbnail_path(id);
        let tmp = path.with_extension("png.tmp");
        fs::write(&tmp, png)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }
}

/// Last path segment of `url`, ignoring query and fragment.
fn url_file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
