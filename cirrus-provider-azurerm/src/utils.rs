//! Utility functions for value normalization and conversion

use std::sync::LazyLock;

use cirrus_core::translate::{FieldPath, TranslationError};
use cirrus_core::{CoreError, CoreResult, IdSchema, LockName, ResourceIdentifier};
use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::ids::{SUBNET, VIRTUAL_NETWORK};

static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9_.-]{0,78}[a-zA-Z0-9_])?$").expect("valid name pattern")
});

/// Normalize a location the way ARM reports it (e.g., "West Europe" -> "westeurope")
pub fn normalize_location(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// Deserialize a location in its normalized form, so "West Europe" and
/// "westeurope" compare equal
pub fn deserialize_location<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(|s| normalize_location(&s))
}

/// Validate an ARM object name: 1-80 characters, alphanumerics, `_`, `.` and
/// `-`, starting with an alphanumeric and not ending with `.` or `-`
pub fn validate_name(path: &FieldPath, name: &str) -> Result<(), TranslationError> {
    if NAME.is_match(name) {
        Ok(())
    } else {
        Err(path.error(format!("{:?} is not a valid name", name)))
    }
}

/// Parse an identifier referenced from a desired document; errors point at the field
pub fn parse_reference(
    path: &FieldPath,
    schema: &'static IdSchema,
    raw: &str,
) -> Result<ResourceIdentifier, TranslationError> {
    schema.parse(raw).map_err(|e| match e {
        CoreError::MalformedIdentifier { reason, .. } => {
            path.error(format!("expected a {} ID: {}", schema.kind, reason))
        }
        other => path.error(other.to_string()),
    })
}

/// Virtual network a subnet belongs to
pub fn subnet_parent(subnet: &ResourceIdentifier) -> CoreResult<ResourceIdentifier> {
    if subnet.schema() != &SUBNET {
        return Err(CoreError::malformed(
            subnet.format(),
            format!("expected a {} ID", SUBNET.kind),
        ));
    }
    let values = subnet.values();
    VIRTUAL_NETWORK.build(&values[..values.len() - 1])
}

/// Lock on a shared parent object
///
/// ARM names are case-insensitive, so the key is lowercased: two references
/// to the same parent must take the same lock.
pub fn parent_lock(scope: &str, parent: &ResourceIdentifier) -> LockName {
    LockName::new(scope, parent.format().to_lowercase())
}
