//! Input sanitization for job requests.
//!
//! Everything here runs before a payload is built, so the worker never
//! sees a traversal path, an unexpected URL scheme, or a branch name that
//! could be read as a git option.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use path_clean::PathClean;
use regex::Regex;
use url::Url;

use crate::error::{BridgeError, BridgeResult};
use crate::protocol::is_valid_entity_id;

/// URL schemes accepted for repository sources.
const ALLOWED_SCHEMES: &[&str] = &["http", "https", "ssh", "git", "file"];

static BRANCH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]{0,254}$").expect("branch pattern is valid")
});

static ENV_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env key pattern is valid"));

pub(crate) fn entity_id(id: &str) -> BridgeResult<&str> {
    if is_valid_entity_id(id) {
        Ok(id)
    } else {
        Err(BridgeError::validation(format!("invalid entity id {id:?}")))
    }
}

pub(crate) fn repo_url(raw: &str) -> BridgeResult<String> {
    let url = Url::parse(raw.trim())
        .map_err(|e| BridgeError::validation(format!("invalid repository URL {raw:?}: {e}")))?;
    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(BridgeError::validation(format!(
            "unsupported repository URL scheme {:?}",
            url.scheme()
        )));
    }
    if url.scheme() != "file" && url.host_str().is_none_or(str::is_empty) {
        return Err(BridgeError::validation(format!(
            "repository URL {raw:?} has no host"
        )));
    }
    Ok(url.into())
}

pub(crate) fn branch(name: &str) -> BridgeResult<&str> {
    if !BRANCH_PATTERN.is_match(name)
        || name.contains("..")
        || name.contains("//")
        || name.ends_with('/')
        || name.ends_with(".lock")
    {
        return Err(BridgeError::validation(format!("invalid branch name {name:?}")));
    }
    Ok(name)
}

/// Normalize a relative directory and reject anything escaping its base.
pub(crate) fn relative_dir(raw: &str) -> BridgeResult<String> {
    if raw.is_empty() || raw.contains('\0') {
        return Err(BridgeError::validation("directory must be a non-empty path"));
    }
    let cleaned: PathBuf = Path::new(raw).clean();
    let escapes = cleaned.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || cleaned == Path::new(".") {
        return Err(BridgeError::validation(format!(
            "directory {raw:?} must stay inside the workspace"
        )));
    }
    cleaned
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| BridgeError::validation(format!("directory {raw:?} is not valid UTF-8")))
}

pub(crate) fn command(raw: &str) -> BridgeResult<&str> {
    if raw.trim().is_empty() || raw.contains('\0') {
        return Err(BridgeError::validation("command must be non-empty"));
    }
    Ok(raw)
}

pub(crate) fn env(vars: &BTreeMap<String, String>) -> BridgeResult<()> {
    for (key, value) in vars {
        if !ENV_KEY_PATTERN.is_match(key) {
            return Err(BridgeError::validation(format!(
                "invalid environment variable name {key:?}"
            )));
        }
        if value.contains('\0') {
            return Err(BridgeError::validation(format!(
                "environment variable {key} contains a NUL byte"
            )));
        }
    }
    Ok(())
}
