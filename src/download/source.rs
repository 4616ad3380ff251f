//! Per-call fetch configuration and safe path resolution.
//!
//! A [`FetchSource`] is an immutable value describing where files come from
//! and where they land. Each mirror phase builds its own value instead of
//! reconfiguring a shared downloader, so phases never observe each other's
//! settings.

use std::path::{Component, Path, PathBuf};

use url::Url;

use super::DownloadError;

/// Where a fetch reads from and writes to.
#[derive(Clone)]
pub struct FetchSource {
    base_url: Url,
    destination_root: PathBuf,
    fallback_root: Option<PathBuf>,
    auth_token: Option<String>,
}

// Hand-written so the bearer token never reaches logs.
impl std::fmt::Debug for FetchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchSource")
            .field("base_url", &self.base_url.as_str())
            .field("destination_root", &self.destination_root)
            .field("fallback_root", &self.fallback_root)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl FetchSource {
    /// Creates a source rooted at `base_url`, writing beneath `destination_root`.
    ///
    /// The base URL is normalised to end with `/` so that relative locations
    /// join beneath it rather than replacing its last segment.
    #[must_use]
    pub fn new(base_url: Url, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            base_url: with_trailing_slash(base_url),
            destination_root: destination_root.into(),
            fallback_root: None,
            auth_token: None,
        }
    }

    /// Parses `base_url` and creates a source.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if the URL cannot be parsed.
    pub fn parse(base_url: &str, destination_root: impl Into<PathBuf>) -> Result<Self, DownloadError> {
        let url = Url::parse(base_url).map_err(|_| DownloadError::invalid_url(base_url))?;
        Ok(Self::new(url, destination_root))
    }

    /// Directory consulted for an already verified copy before fetching.
    #[must_use]
    pub fn with_fallback_root(mut self, fallback_root: impl Into<PathBuf>) -> Self {
        self.fallback_root = Some(fallback_root.into());
        self
    }

    /// Bearer credential sent with HTTP requests.
    #[must_use]
    pub fn with_auth_token(mut self, auth_token: Option<String>) -> Self {
        self.auth_token = auth_token.filter(|token| !token.is_empty());
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    #[must_use]
    pub fn fallback_root(&self) -> Option<&Path> {
        self.fallback_root.as_deref()
    }

    #[must_use]
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// Absolute URL of `location`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::UnsafePath`] for locations that are absolute or
    /// climb above the base, and [`DownloadError::InvalidUrl`] if joining fails.
    pub fn url_for(&self, location: &str) -> Result<Url, DownloadError> {
        let relative = normalize_location(location)?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        // "./" keeps a colon in the first segment from parsing as a scheme
        self.base_url
            .join(&format!("./{relative}"))
            .map_err(|_| DownloadError::invalid_url(format!("{}{relative}", self.base_url)))
    }

    /// Local destination path of `location`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::UnsafePath`] if the location escapes the root.
    pub fn local_path_for(&self, location: &str) -> Result<PathBuf, DownloadError> {
        resolve_local_path(&self.destination_root, location)
    }

    /// Fallback copy path of `location`, if a fallback root is configured.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::UnsafePath`] if the location escapes the root.
    pub fn fallback_path_for(&self, location: &str) -> Result<Option<PathBuf>, DownloadError> {
        self.fallback_root
            .as_deref()
            .map(|root| resolve_local_path(root, location))
            .transpose()
    }
}

/// Joins a metadata `location` onto `root`, rejecting escapes.
///
/// `.` segments are dropped and `..` segments are folded; a location that is
/// absolute, empty, or folds above `root` is refused.
///
/// # Errors
///
/// Returns [`DownloadError::UnsafePath`] for refused locations.
pub fn resolve_local_path(root: &Path, location: &str) -> Result<PathBuf, DownloadError> {
    Ok(root.join(normalize_location(location)?))
}

fn normalize_location(location: &str) -> Result<PathBuf, DownloadError> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(location).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(DownloadError::unsafe_path(location));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(DownloadError::unsafe_path(location));
            }
        }
    }
    if parts.is_empty() {
        return Err(DownloadError::unsafe_path(location));
    }
    Ok(parts.into_iter().collect())
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_local_path_plain_location() {
        let path = resolve_local_path(Path::new("/srv/mirror"), "x86_64/a-1.0.rpm").unwrap();
        assert_eq!(path, PathBuf::from("/srv/mirror/x86_64/a-1.0.rpm"));
    }

    #[test]
    fn test_resolve_local_path_folds_inner_parent_dirs() {
        let path = resolve_local_path(Path::new("/srv/mirror"), "x86_64/../noarch/./b.rpm").unwrap();
        assert_eq!(path, PathBuf::from("/srv/mirror/noarch/b.rpm"));
    }

    #[test]
    fn test_resolve_local_path_rejects_escape() {
        let result = resolve_local_path(Path::new("/srv/mirror"), "../../etc/passwd");
        assert!(matches!(result, Err(DownloadError::UnsafePath { .. })));

        let result = resolve_local_path(Path::new("/srv/mirror"), "x86_64/../../secret");
        assert!(matches!(result, Err(DownloadError::UnsafePath { .. })));
    }

    #[test]
    fn test_resolve_local_path_rejects_absolute_and_empty() {
        assert!(resolve_local_path(Path::new("/srv/mirror"), "/etc/passwd").is_err());
        assert!(resolve_local_path(Path::new("/srv/mirror"), "").is_err());
        assert!(resolve_local_path(Path::new("/srv/mirror"), "a/..").is_err());
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let source = FetchSource::parse("https://example.com/repo/SLES", "/tmp/x").unwrap();
        assert_eq!(source.base_url().as_str(), "https://example.com/repo/SLES/");
        let url = source.url_for("repodata/repomd.xml").unwrap();
        assert_eq!(url.as_str(), "https://example.com/repo/SLES/repodata/repomd.xml");
    }

    #[test]
    fn test_url_for_rejects_escape() {
        let source = FetchSource::parse("https://example.com/repo/", "/tmp/x").unwrap();
        assert!(matches!(
            source.url_for("../other/file"),
            Err(DownloadError::UnsafePath { .. })
        ));
    }

    #[test]
    fn test_fallback_path_only_when_configured() {
        let source = FetchSource::parse("https://example.com/repo/", "/tmp/stage").unwrap();
        assert!(source.fallback_path_for("repodata/a.xml").unwrap().is_none());

        let source = source.with_fallback_root("/srv/live");
        assert_eq!(
            source.fallback_path_for("repodata/a.xml").unwrap(),
            Some(PathBuf::from("/srv/live/repodata/a.xml"))
        );
    }

    #[test]
    fn test_empty_auth_token_is_dropped() {
        let source = FetchSource::parse("https://example.com/repo/", "/tmp/x")
            .unwrap()
            .with_auth_token(Some(String::new()));
        assert!(source.auth_token().is_none());
    }

    #[test]
    fn test_debug_redacts_auth_token() {
        let source = FetchSource::parse("https://example.com/repo/", "/tmp/x")
            .unwrap()
            .with_auth_token(Some("s3cret".to_string()));
        let rendered = format!("{source:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }
}
