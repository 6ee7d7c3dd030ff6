//! Semantic version comparison for update decisions.

use semver::Version;

use crate::core::UpdateError;

/// Parse a version identifier as published in a manifest.
///
/// Accepts an optional leading `v` and pads two-component versions
/// (`1.2` → `1.2.0`). Anything else that is not valid semver is rejected.
pub fn parse_version(input: &str) -> Result<Version, UpdateError> {
    let trimmed = input.trim();
    let bare = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);

    match Version::parse(bare) {
        Ok(version) => Ok(version),
        Err(e) => {
            let parts: Vec<&str> = bare.split('.').collect();
            let numeric = parts
                .iter()
                .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
            if numeric && (1..3).contains(&parts.len()) {
                let padded = format!("{bare}{}", ".0".repeat(3 - parts.len()));
                if let Ok(version) = Version::parse(&padded) {
                    return Ok(version);
                }
            }
            Err(UpdateError::VersionParse {
                version: input.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Whether `remote` is strictly newer than `current`.
///
/// Components compare numerically, so `1.10.0` is newer than `1.9.0`.
/// A malformed version on either side is an error rather than "not newer".
pub fn is_newer(remote: &str, current: &str) -> Result<bool, UpdateError> {
    let remote = parse_version(remote)?;
    let current = parse_version(current)?;
    Ok(remote > current)
}
