//! Local snapshot of the remote station directory.
//!
//! `resolve` only ever reads the snapshot. `refresh` is the one operation that
//! touches the network, and it replaces the snapshot file in a single rename.

use crate::error::{RefreshError, ResolveError};
use crate::station::{normalize_tag, Station};
use reqwest::Client;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_ENDPOINT: &str = "http://all.api.radio-browser.info/json/stations/search";

/// Server-side filter: stations we can decode that passed their last check.
const CATALOG_FILTER: [(&str, &str); 2] = [("codec", "MP3"), ("lastcheckok", "1")];

pub struct StationDirectory {
    client: Client,
    endpoint: String,
    cache_file: PathBuf,
    refresh_lock: Mutex<()>,
    /// Bumped after every successful refresh.
    generation: AtomicU64,
    last_count: AtomicUsize,
}

impl StationDirectory {
    pub fn new(client: Client, endpoint: impl Into<String>, cache_file: impl Into<PathBuf>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            cache_file: cache_file.into(),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            last_count: AtomicUsize::new(0),
        }
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// First station, in file order, whose tags contain `tag`.
    pub fn resolve(&self, tag: &str) -> Result<Station, ResolveError> {
        let needle = normalize_tag(tag);
        if needle.is_empty() {
            return Err(ResolveError::EmptyTag);
        }
        let stations = self.load()?;

        // A hit without a URL could never be opened; look further down the list.
        let found = stations
            .into_iter()
            .find(|s| !s.url.trim().is_empty() && s.matches_tag(&needle));
        match found {
            Some(station) => {
                debug!("tag {:?} resolved to {} ({})", needle, station.name, station.url);
                Ok(station)
            }
            None => Err(ResolveError::NotFound(needle)),
        }
    }

    fn load(&self) -> Result<Vec<Station>, ResolveError> {
        let raw = match std::fs::read(&self.cache_file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ResolveError::CacheMissing)
            }
            Err(e) => return Err(ResolveError::CacheUnreadable(e.to_string())),
        };

        // A zero-length file is what an interrupted first download would
        // leave if rename were not atomic; treat it as never fetched.
        if raw.is_empty() {
            return Err(ResolveError::CacheMissing);
        }

        serde_json::from_slice(&raw).map_err(|e| {
            warn!("station cache {:?} is not a station list: {}", self.cache_file, e);
            ResolveError::CacheUnreadable(e.to_string())
        })
    }

    /// Downloads the full catalog and swaps it in as the new snapshot.
    ///
    /// Concurrent callers are serialized; a caller that waited on a refresh
    /// which succeeded meanwhile returns that result instead of fetching
    /// again. Returns the number of stations in the snapshot.
    pub async fn refresh(&self) -> Result<usize, RefreshError> {
        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            debug!("joined an in-flight station refresh");
            return Ok(self.last_count.load(Ordering::Acquire));
        }

        info!("refreshing station directory from {}", self.endpoint);

        let body = self
            .client
            .get(&self.endpoint)
            .query(&CATALOG_FILTER)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let stations: Vec<Station> = serde_json::from_slice(&body)?;
        let pretty = serde_json::to_vec_pretty(&stations)?;

        let path = self.cache_file.clone();
        tokio::task::spawn_blocking(move || replace_file(&path, &pretty))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        self.last_count.store(stations.len(), Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        info!("station cache {:?} now holds {} stations", self.cache_file, stations.len());
        Ok(stations.len())
    }
}

/// Writes `data` next to `path` and renames it into place.
fn replace_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    // tempfile creates 0600; the cache is an ordinary readable file.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
