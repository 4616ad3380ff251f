//! User-Agent string sent with every mirror request.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/repo-mirror";

/// Default User-Agent for mirror requests (identifies the tool and version).
#[must_use]
pub(crate) fn default_mirror_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("repo-mirror/{version} (+{PROJECT_UA_URL})")
}
