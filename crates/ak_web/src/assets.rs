//! Front-end bundle serving with SPA fallback.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use ak_config::WebConfig;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::Response;
use http::header::CACHE_CONTROL;
use http::{HeaderValue, Method};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, warn};

use crate::{AppState, WebError};

/// SPA entry file, served for every path that does not name a file
pub const ENTRY_FILE: &str = "index.html";

/// Files under this directory are long-lived and served with a cache header
const CACHED_DIR: &str = "assets";
const ASSET_CACHE_CONTROL: &str = "public, max-age=86400";

const FAVICON_CANDIDATES: [&str; 2] = ["assets/favicons/favicon.ico", "favicon.ico"];
const DEFAULT_ROOTS: [&str; 4] = ["frontend", "../frontend", "web/dist", "public"];

/// A canonicalized asset root
#[derive(Debug, Clone)]
pub struct StaticAssets {
    root: PathBuf,
}

impl StaticAssets {
    /// # Errors
    /// Returns an I/O error if `root` does not exist.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            root: root.as_ref().canonicalize()?,
        })
    }

    /// Configured `static_dir` first, then the conventional bundle locations.
    #[must_use]
    pub fn discover(config: &WebConfig) -> Option<Self> {
        if let Some(dir) = &config.static_dir {
            if dir.is_dir()
                && let Ok(assets) = Self::new(dir)
            {
                return Some(assets);
            }
            warn!(dir = %dir.display(), "static_dir does not exist; trying default locations");
        }

        DEFAULT_ROOTS
            .iter()
            .map(Path::new)
            .filter(|candidate| candidate.is_dir())
            .find_map(|candidate| Self::new(candidate).ok())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File to serve for a raw (percent-encoded) request path, or `None` for a 404.
    #[must_use]
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let Ok(decoded) = urlencoding::decode(request_path) else {
            return self.entry();
        };
        let relative = decoded.trim_start_matches('/');
        if relative == "favicon.ico" {
            return FAVICON_CANDIDATES
                .iter()
                .find_map(|candidate| self.lookup(candidate));
        }

        self.lookup(relative).or_else(|| self.entry())
    }

    fn entry(&self) -> Option<PathBuf> {
        let entry = self.root.join(ENTRY_FILE);
        entry.is_file().then_some(entry)
    }

    /// Existing regular file under the root; anything but plain names is refused.
    fn lookup(&self, relative: &str) -> Option<PathBuf> {
        if relative.is_empty() {
            return None;
        }

        let mut candidate = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => candidate.push(part),
                _ => return None,
            }
        }

        // Symlinks may point anywhere; judge the real location.
        let canonical = candidate.canonicalize().ok()?;
        (canonical.starts_with(&self.root) && canonical.is_file()).then_some(canonical)
    }

    #[must_use]
    pub fn is_cacheable(&self, path: &Path) -> bool {
        path.strip_prefix(&self.root)
            .is_ok_and(|relative| relative.starts_with(CACHED_DIR))
    }
}

/// Router fallback serving the bundle for GET and HEAD
pub async fn static_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, WebError> {
    if !matches!(*request.method(), Method::GET | Method::HEAD) {
        return Err(WebError::MethodNotAllowed(request.method().to_string()));
    }

    let assets = state
        .assets
        .as_ref()
        .ok_or_else(|| WebError::NotFound("no front-end bundle configured".to_string()))?;
    let path = assets
        .resolve(request.uri().path())
        .ok_or_else(|| WebError::NotFound(request.uri().path().to_string()))?;

    debug!(request = %request.uri().path(), file = %path.display(), "Serving static file");
    let cacheable = assets.is_cacheable(&path);

    let mut response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };
    if cacheable && response.status().is_success() {
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static(ASSET_CACHE_CONTROL));
    }
    Ok(response)
}
