//! # Revision Selection
//!
//! Picks the latest named revision from an unordered list using semantic
//! version precedence (major, minor, patch, then pre-release).

use semver::Version;
use std::cmp::Ordering;
use thiserror::Error;

/// Anything carrying a revision name and a semantic version string
pub trait Versioned {
    fn revision_name(&self) -> &str;
    fn version(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("no revisions defined")]
    Empty,

    #[error("revision {revision} has invalid version '{version}': {source}")]
    InvalidVersion {
        revision: String,
        version: String,
        #[source]
        source: semver::Error,
    },
}

fn parse<R: Versioned>(revision: &R) -> Result<Version, RevisionError> {
    Version::parse(revision.version()).map_err(|source| RevisionError::InvalidVersion {
        revision: revision.revision_name().to_string(),
        version: revision.version().to_string(),
        source,
    })
}

/// Revision with the highest version. Every version must parse, even ones that
/// would never win. On equal precedence the earlier revision is kept.
pub fn select_latest<R: Versioned>(revisions: &[R]) -> Result<&R, RevisionError> {
    let mut latest: Option<(&R, Version)> = None;
    for revision in revisions {
        let version = parse(revision)?;
        let newer = match &latest {
            None => true,
            Some((_, best)) => version.cmp_precedence(best) == Ordering::Greater,
        };
        if newer {
            latest = Some((revision, version));
        }
    }
    latest.map(|(r, _)| r).ok_or(RevisionError::Empty)
}
