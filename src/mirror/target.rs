//! Repository to mirror.

use std::path::{Path, PathBuf};

use url::Url;

use crate::download::DownloadError;

/// Immutable description of one repository and where it is mirrored to.
#[derive(Clone)]
pub struct RepositoryTarget {
    source_url: Url,
    destination: PathBuf,
    mirror_src: bool,
    auth_token: Option<String>,
}

impl std::fmt::Debug for RepositoryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryTarget")
            .field("source_url", &self.source_url.as_str())
            .field("destination", &self.destination)
            .field("mirror_src", &self.mirror_src)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RepositoryTarget {
    /// Creates a target for `source_url` (`http`, `https` or `file`).
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] for an unparsable URL or an
    /// unsupported scheme.
    pub fn new(source_url: &str, destination: impl Into<PathBuf>) -> Result<Self, DownloadError> {
        let mut url = Url::parse(source_url).map_err(|_| DownloadError::invalid_url(source_url))?;
        if !matches!(url.scheme(), "http" | "https" | "file") {
            return Err(DownloadError::invalid_url(source_url));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self {
            source_url: url,
            destination: destination.into(),
            mirror_src: false,
            auth_token: None,
        })
    }

    /// Also mirror `src`/`nosrc` packages and deltas.
    #[must_use]
    pub fn with_mirror_src(mut self, mirror_src: bool) -> Self {
        self.mirror_src = mirror_src;
        self
    }

    #[must_use]
    pub fn with_auth_token(mut self, auth_token: Option<String>) -> Self {
        self.auth_token = auth_token.filter(|token| !token.is_empty());
        self
    }

    /// Source URL, always ending with `/`.
    #[must_use]
    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    #[must_use]
    pub fn mirror_src(&self) -> bool {
        self.mirror_src
    }

    #[must_use]
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_source_url_gets_trailing_slash() {
        let target = RepositoryTarget::new("https://updates.example.com/SLE15/x86_64", "/srv/a").unwrap();
        assert_eq!(
            target.source_url().as_str(),
            "https://updates.example.com/SLE15/x86_64/"
        );
        let joined = target.source_url().join("repodata/repomd.xml").unwrap();
        assert_eq!(
            joined.as_str(),
            "https://updates.example.com/SLE15/x86_64/repodata/repomd.xml"
        );
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        assert!(matches!(
            RepositoryTarget::new("ftp://mirror.example.com/repo/", "/srv/a"),
            Err(DownloadError::InvalidUrl { .. })
        ));
        assert!(RepositoryTarget::new("not a url", "/srv/a").is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let target = RepositoryTarget::new("file:///srv/upstream/", "/srv/a")
            .unwrap()
            .with_auth_token(Some("s3cret".to_string()));
        let debug = format!("{target:?}");
        assert!(!debug.contains("s3cret"));
        assert_eq!(target.auth_token(), Some("s3cret"));
    }

    #[test]
    fn test_empty_token_is_none() {
        let target = RepositoryTarget::new("http://h/r/", "/srv/a")
            .unwrap()
            .with_auth_token(Some(String::new()));
        assert_eq!(target.auth_token(), None);
    }
}
