//! # Source Grouping
//!
//! Deterministic identities for the chain of objects created per source.
//!
//! A source locator is parsed into `host/owner/repo`. Together with the owning
//! resource's name and the tracked revision it yields a group key of the form
//! `host-owner-repo-ref-hash`, where `hash` is the decimal FNV-1a 64 hash of
//! `ownerName-host-owner-repo-ref`. Re-deriving the key for an unchanged
//! source always produces the same child object names.

use crate::crd::CatalogSource;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Longest object name that is also a valid label value
const MAX_KEY_LEN: usize = 63;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

// https://host[:port]/path, ssh://user@host[:port]/path, git://host/path
static URL_LOCATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:https?|ssh|git)://(?:[^@/]+@)?(?P<host>[^/:@]+)(?::\d+)?",
        r"/(?P<path>[^?#]+?)(?:\.git)?/?$",
    ))
    .expect("static regex is valid")
});

// user@host:path
static SCP_LOCATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[^@/]+@)?(?P<host>[^/:@]+):(?P<path>[^/][^?#]*?)(?:\.git)?/?$")
        .expect("static regex is valid")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GroupingError {
    #[error("invalid source locator '{url}': {reason}")]
    InvalidLocator { url: String, reason: String },
    #[error("source '{url}' collides with source #{first} (group {key})")]
    DuplicateSource {
        url: String,
        first: usize,
        key: String,
    },
}

/// Repository identity parsed from a source locator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocator {
    /// Host with `.` replaced by `-`
    pub host: String,
    /// Owner path; nested groups are joined with `-`
    pub owner: String,
    pub repo: String,
}

/// One source and the identity of the child chain it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGroup {
    pub key: String,
    pub locator: SourceLocator,
    pub source: CatalogSource,
}

/// Parse `https://`, `ssh://`, `git://` and scp-style locators
pub fn parse_source_locator(url: &str) -> Result<SourceLocator, GroupingError> {
    let trimmed = url.trim();
    let invalid = |reason: &str| GroupingError::InvalidLocator {
        url: trimmed.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("locator cannot be empty"));
    }

    let captures = URL_LOCATOR
        .captures(trimmed)
        .or_else(|| {
            if trimmed.contains("://") {
                None
            } else {
                SCP_LOCATOR.captures(trimmed)
            }
        })
        .ok_or_else(|| invalid("expected https://host/owner/repo or git@host:owner/repo"))?;

    let host = normalize_host(&captures["host"]);
    let segments: Vec<&str> = captures["path"]
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    let Some((repo, owner)) = segments.split_last() else {
        return Err(invalid("missing repository path"));
    };
    if owner.is_empty() {
        return Err(invalid("missing repository owner"));
    }

    Ok(SourceLocator {
        host,
        owner: owner.join("-"),
        repo: (*repo).to_string(),
    })
}

/// Lowercase the host and replace `.` so it can be part of an object name
#[must_use]
pub fn normalize_host(host: &str) -> String {
    host.to_lowercase().replace('.', "-")
}

/// 64-bit FNV-1a
#[must_use]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// The string a group key hashes; two sources with equal identities collide
#[must_use]
pub fn group_identity(
    owner_name: &str,
    host: &str,
    owner: &str,
    repo: &str,
    reference: &str,
) -> String {
    format!("{owner_name}-{host}-{owner}-{repo}-{reference}")
}

/// Derive the group key for one source of `owner_name`
///
/// `host` is expected to be normalized already. The readable prefix is
/// reduced to `[a-z0-9-]` and shortened when needed so the whole key fits in
/// 63 characters; the hash suffix is never shortened.
#[must_use]
pub fn group_key(owner_name: &str, host: &str, owner: &str, repo: &str, reference: &str) -> String {
    let identity = group_identity(owner_name, host, owner, repo, reference);
    let hash = fnv1a_64(identity.as_bytes()).to_string();

    let prefix = sanitize(&format!("{host}-{owner}-{repo}-{reference}"));
    let budget = MAX_KEY_LEN - hash.len() - 1;
    let prefix = prefix[..prefix.len().min(budget)].trim_end_matches('-');

    if prefix.is_empty() {
        hash
    } else {
        format!("{prefix}-{hash}")
    }
}

/// Lowercase, map everything outside `[a-z0-9-]` to `-`, collapse runs of `-`
fn sanitize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.to_lowercase().chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '-' };
        if c == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(c);
    }
    out
}

/// Resolve every source of `owner_name` into a group
///
/// Fails on the first unparsable locator, or when two sources share a group
/// identity. Besides the same repository and revision spelled differently,
/// that covers distinct paths whose `-` joined form is equal, such as
/// `a/b-c` and `a-b/c`.
pub fn resolve_groups(
    owner_name: &str,
    sources: &[CatalogSource],
) -> Result<Vec<SourceGroup>, GroupingError> {
    let mut seen: HashMap<String, (usize, String)> = HashMap::new();
    let mut groups = Vec::with_capacity(sources.len());

    for (index, source) in sources.iter().enumerate() {
        let locator = parse_source_locator(&source.url)?;
        let reference = source.reference.revision();
        let identity = group_identity(
            owner_name,
            &locator.host,
            &locator.owner,
            &locator.repo,
            reference,
        );
        let key = group_key(
            owner_name,
            &locator.host,
            &locator.owner,
            &locator.repo,
            reference,
        );

        if let Some((first, existing)) = seen.get(&identity) {
            return Err(GroupingError::DuplicateSource {
                url: source.url.clone(),
                first: *first,
                key: existing.clone(),
            });
        }
        seen.insert(identity, (index, key.clone()));

        groups.push(SourceGroup {
            key,
            locator,
            source: source.clone(),
        });
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ApplyTarget, SourceReference};

    fn source(url: &str, tag: Option<&str>) -> CatalogSource {
        CatalogSource {
            url: url.to_string(),
            reference: SourceReference {
                tag: tag.map(str::to_string),
                ..SourceReference::default()
            },
            path: None,
            target: ApplyTarget::Kustomization,
        }
    }

    #[test]
    fn test_parse_https_locator() {
        let locator = parse_source_locator("https://github.com/org/repo.git").unwrap();
        assert_eq!(locator.host, "github-com");
        assert_eq!(locator.owner, "org");
        assert_eq!(locator.repo, "repo");
    }

    #[test]
    fn test_parse_scp_and_ssh_locators_agree() {
        let scp = parse_source_locator("git@github.com:org/repo.git").unwrap();
        let ssh = parse_source_locator("ssh://git@github.com:22/org/repo").unwrap();
        let https = parse_source_locator("https://github.com/org/repo/").unwrap();
        assert_eq!(scp, ssh);
        assert_eq!(scp, https);
    }

    #[test]
    fn test_parse_nested_owner() {
        let locator =
            parse_source_locator("https://gitlab.example.com/team/platform/charts").unwrap();
        assert_eq!(locator.host, "gitlab-example-com");
        assert_eq!(locator.owner, "team-platform");
        assert_eq!(locator.repo, "charts");
    }

    #[test]
    fn test_parse_rejects_malformed_locators() {
        for url in [
            "",
            "github.com",
            "https://github.com/",
            "https://github.com/repo",
            "ftp://x/y/z",
        ] {
            assert!(
                matches!(parse_source_locator(url), Err(GroupingError::InvalidLocator { .. })),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_group_key_is_deterministic() {
        let first = group_key("cat", "github-com", "org", "repo", "main");
        let second = group_key("cat", "github-com", "org", "repo", "main");
        assert_eq!(first, second);

        let hash = fnv1a_64(b"cat-github-com-org-repo-main");
        assert_eq!(first, format!("github-com-org-repo-main-{hash}"));
    }

    #[test]
    fn test_group_key_changes_with_every_input() {
        let base = group_key("cat", "github-com", "org", "repo", "main");
        for other in [
            group_key("dog", "github-com", "org", "repo", "main"),
            group_key("cat", "gitlab-com", "org", "repo", "main"),
            group_key("cat", "github-com", "team", "repo", "main"),
            group_key("cat", "github-com", "org", "other", "main"),
            group_key("cat", "github-com", "org", "repo", "dev"),
        ] {
            assert_ne!(base, other);
        }
    }

    #[test]
    fn test_group_key_fits_label_value() {
        let key = group_key(
            "cat",
            "git-internal-example-company-com",
            "a-very-long-organisation-name",
            "an-even-longer-repository-name",
            "release/2024.10",
        );
        assert!(key.len() <= 63, "{key} is too long");
        assert!(key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert!(!key.starts_with('-'));
    }

    #[test]
    fn test_resolve_rejects_duplicates() {
        let sources = vec![
            source("https://github.com/org/repo", Some("v1")),
            source("https://github.com/org/other", Some("v1")),
            source("git@github.com:org/repo.git", Some("v1")),
        ];

        let err = resolve_groups("cat", &sources).unwrap_err();

        assert!(matches!(err, GroupingError::DuplicateSource { first: 0, .. }));
    }

    #[test]
    fn test_resolve_rejects_joined_path_collision() {
        let sources = vec![
            source("https://github.com/a/b-c", Some("main")),
            source("https://github.com/a-b/c", Some("main")),
        ];

        let err = resolve_groups("cat", &sources).unwrap_err();

        assert!(matches!(err, GroupingError::DuplicateSource { first: 0, .. }));
    }

    #[test]
    fn test_resolve_same_repo_different_ref() {
        let sources = vec![
            source("https://github.com/org/repo", Some("v1")),
            source("https://github.com/org/repo", Some("v2")),
        ];

        let groups = resolve_groups("cat", &sources).unwrap();

        assert_eq!(groups.len(), 2);
        assert_ne!(groups[0].key, groups[1].key);
    }
}
