//! Configuration file loading and merging with CLI flags.
//!
//! The file is a small TOML subset: global `key = value` lines followed by
//! any number of `[[repository]]` tables.
//!
//! ```toml
//! mirror_dir = "/srv/mirror"
//! concurrency = 16
//!
//! [[repository]]
//! url = "https://updates.example.com/SLE15-SP5/x86_64/update/"
//! local_path = "SLE15-SP5/x86_64/update"
//! auth_token = "..."
//! ```

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use mirror_core::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, FailurePolicy, LinkMode};
use mirror_core::download::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};

use crate::cli::Args;

const CONFIG_DIR_NAME: &str = "repo-mirror";
const STORE_DIR_NAME: &str = ".store";

/// One `[[repository]]` table.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RepositoryEntry {
    pub url: String,
    /// Path below `mirror_dir`.
    pub local_path: PathBuf,
    pub auth_token: Option<String>,
    pub mirror_src: Option<bool>,
}

impl std::fmt::Debug for RepositoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryEntry")
            .field("url", &self.url)
            .field("local_path", &self.local_path)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("mirror_src", &self.mirror_src)
            .finish()
    }
}

/// Values read from the configuration file.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Root under which every repository's `local_path` lives.
    pub mirror_dir: Option<PathBuf>,
    /// Content store root.
    pub store_dir: Option<PathBuf>,
    /// Parent of per-cycle scratch directories.
    pub scratch_dir: Option<PathBuf>,
    pub concurrency: Option<u8>,
    pub max_retries: Option<u8>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    /// Default for repositories that do not set `mirror_src` themselves.
    pub mirror_src: Option<bool>,
    pub link_mode: Option<LinkMode>,
    pub repositories: Vec<RepositoryEntry>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=100).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=100");
        }
        if let Some(max_retries) = self.max_retries
            && max_retries > 10
        {
            bail!("Invalid config value for `max_retries`: {max_retries}. Expected range: 0..=10");
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        if !self.repositories.is_empty() && self.mirror_dir.is_none() {
            bail!("Missing `mirror_dir`: required when repositories are configured");
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Path consulted, if one could be determined.
    pub path: Option<PathBuf>,
    /// Parsed config when a file was found.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/repo-mirror/config.toml`
/// 2. `$HOME/.config/repo-mirror/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join(CONFIG_DIR_NAME)
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads `explicit` (which must exist) or the default file if present.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// A `[[repository]]` table being read, with its header line.
struct PendingRepository {
    line: usize,
    url: Option<String>,
    local_path: Option<PathBuf>,
    auth_token: Option<String>,
    mirror_src: Option<bool>,
}

impl PendingRepository {
    fn new(line: usize) -> Self {
        Self {
            line,
            url: None,
            local_path: None,
            auth_token: None,
            mirror_src: None,
        }
    }

    fn finish(self) -> Result<RepositoryEntry> {
        let Some(url) = self.url else {
            bail!("[[repository]] on line {} is missing `url`", self.line);
        };
        let Some(local_path) = self.local_path else {
            bail!("[[repository]] on line {} is missing `local_path`", self.line);
        };
        Ok(RepositoryEntry {
            url,
            local_path,
            auth_token: self.auth_token,
            mirror_src: self.mirror_src,
        })
    }
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    let mut current: Option<PendingRepository> = None;

    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') {
            if line != "[[repository]]" {
                bail!("Unknown section '{line}' on line {line_no}: expected [[repository]]");
            }
            if let Some(done) = current.replace(PendingRepository::new(line_no)) {
                cfg.repositories.push(done.finish()?);
            }
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();

        if let Some(repo) = current.as_mut() {
            match key {
                "url" => {
                    repo.url = Some(
                        parse_string_literal(value)
                            .with_context(|| format!("Invalid `url` value on line {line_no}"))?,
                    );
                }
                "local_path" => {
                    let parsed = parse_string_literal(value)
                        .with_context(|| format!("Invalid `local_path` value on line {line_no}"))?;
                    repo.local_path = Some(
                        parse_local_path(&parsed)
                            .with_context(|| format!("Invalid `local_path` value on line {line_no}"))?,
                    );
                }
                "auth_token" => {
                    repo.auth_token = Some(
                        parse_string_literal(value)
                            .with_context(|| format!("Invalid `auth_token` value on line {line_no}"))?,
                    );
                }
                "mirror_src" => {
                    repo.mirror_src = Some(
                        parse_boolean(value)
                            .with_context(|| format!("Invalid `mirror_src` value on line {line_no}"))?,
                    );
                }
                unknown => {
                    bail!("Unknown repository key: '{unknown}' on line {line_no}");
                }
            }
            continue;
        }

        match key {
            "mirror_dir" | "store_dir" | "scratch_dir" => {
                let parsed = PathBuf::from(
                    parse_string_literal(value)
                        .with_context(|| format!("Invalid `{key}` value on line {line_no}"))?,
                );
                match key {
                    "mirror_dir" => cfg.mirror_dir = Some(parsed),
                    "store_dir" => cfg.store_dir = Some(parsed),
                    _ => cfg.scratch_dir = Some(parsed),
                }
            }
            "concurrency" => {
                cfg.concurrency = Some(
                    parse_integer_u8(value)
                        .with_context(|| format!("Invalid `concurrency` value on line {line_no}"))?,
                );
            }
            "max_retries" => {
                cfg.max_retries = Some(
                    parse_integer_u8(value)
                        .with_context(|| format!("Invalid `max_retries` value on line {line_no}"))?,
                );
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(|| {
                    format!("Invalid `connect_timeout_secs` value on line {line_no}")
                })?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(|| {
                    format!("Invalid `read_timeout_secs` value on line {line_no}")
                })?);
            }
            "mirror_src" => {
                cfg.mirror_src = Some(
                    parse_boolean(value)
                        .with_context(|| format!("Invalid `mirror_src` value on line {line_no}"))?,
                );
            }
            "link_mode" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `link_mode` value on line {line_no}"))?;
                cfg.link_mode = Some(
                    parsed
                        .parse::<LinkMode>()
                        .map_err(anyhow::Error::msg)
                        .with_context(|| format!("Invalid `link_mode` value on line {line_no}"))?,
                );
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }

    if let Some(done) = current {
        cfg.repositories.push(done.finish()?);
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

/// Relative path that stays below `mirror_dir`.
fn parse_local_path(raw: &str) -> Result<PathBuf> {
    let path = PathBuf::from(raw.trim_start_matches('/'));
    if path.as_os_str().is_empty() {
        bail!("Expected a non-empty path");
    }
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        bail!("Path must stay below `mirror_dir`");
    }
    Ok(path)
}

fn parse_integer_u8(raw_value: &str) -> Result<u8> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<u16>()?;
    u8::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u8"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

/// Effective settings after CLI flags are applied over the file.
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    pub mirror_dir: PathBuf,
    pub store_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub concurrency: usize,
    pub max_retries: u32,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub mirror_src: bool,
    pub link_mode: LinkMode,
    pub failure_policy: FailurePolicy,
    pub repositories: Vec<RepositoryEntry>,
}

impl MirrorSettings {
    /// Merges CLI flags over `file`.
    ///
    /// The store and scratch directories default to locations inside
    /// `mirror_dir` so that links and renames stay on one filesystem.
    pub fn resolve(args: &Args, file: FileConfig) -> Result<Self> {
        let Some(mirror_dir) = file.mirror_dir else {
            bail!("Missing `mirror_dir` in configuration");
        };
        let store_dir = file
            .store_dir
            .unwrap_or_else(|| mirror_dir.join(STORE_DIR_NAME));
        let scratch_dir = file.scratch_dir.unwrap_or_else(|| mirror_dir.clone());

        Ok(Self {
            concurrency: usize::from(
                args.concurrency
                    .or(file.concurrency)
                    .unwrap_or(DEFAULT_CONCURRENCY as u8),
            ),
            max_retries: u32::from(
                args.max_retries
                    .or(file.max_retries)
                    .unwrap_or(DEFAULT_MAX_RETRIES as u8),
            ),
            connect_timeout_secs: file.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
            read_timeout_secs: file.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS),
            mirror_src: args.mirror_src || file.mirror_src.unwrap_or(false),
            link_mode: file.link_mode.unwrap_or_default(),
            failure_policy: if args.abort_on_failure {
                FailurePolicy::Abort
            } else {
                FailurePolicy::Continue
            },
            repositories: file.repositories,
            mirror_dir,
            store_dir,
            scratch_dir,
        })
    }

    /// Source flag for one repository; the CLI flag forces it on.
    #[must_use]
    pub fn mirror_src_for(&self, args: &Args, entry: &RepositoryEntry) -> bool {
        args.mirror_src || entry.mirror_src.unwrap_or(self.mirror_src)
    }
}
