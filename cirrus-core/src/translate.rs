//! Translate - Helpers shared by every expand/flatten implementation
//!
//! Expand turns a desired document into the remote payload, flatten turns the
//! remote payload back into a desired document. Kinds implement both directions
//! themselves and use the helpers here for the parts that repeat: field paths
//! in errors, CIDR validation, canonical ordering of unordered collections and
//! tags.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Maximum number of tags ARM accepts on one object
pub const MAX_TAGS: usize = 50;
const MAX_TAG_KEY_LEN: usize = 512;
const MAX_TAG_VALUE_LEN: usize = 256;

/// Dotted path to a field of a desired document, e.g. `address_prefixes.1`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn root(name: &str) -> Self {
        Self(vec![name.to_string()])
    }

    pub fn field(&self, name: &str) -> Self {
        let mut parts = self.0.clone();
        parts.push(name.to_string());
        Self(parts)
    }

    pub fn index(&self, index: usize) -> Self {
        self.field(&index.to_string())
    }

    pub fn error(&self, message: impl Into<String>) -> TranslationError {
        TranslationError {
            path: self.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// A single field that could not be translated
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: {message}")]
pub struct TranslationError {
    pub path: String,
    pub message: String,
}

impl TranslationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Validate an IPv4 or IPv6 CIDR block such as `10.0.0.0/16` or `fd00::/64`
pub fn validate_cidr(cidr: &str) -> Result<(), String> {
    let (ip, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("invalid CIDR {:?}: expected IP/prefix", cidr))?;

    let ip: IpAddr = ip
        .parse()
        .map_err(|_| format!("invalid IP address {:?} in CIDR {:?}", ip, cidr))?;

    let max = if ip.is_ipv4() { 32 } else { 128 };
    match prefix.parse::<u8>() {
        Ok(p) if p <= max => Ok(()),
        Ok(p) => Err(format!("invalid prefix length {} (must be 0-{})", p, max)),
        Err(_) => Err(format!(
            "invalid prefix length {:?}: must be a number",
            prefix
        )),
    }
}

/// Validate one CIDR field and return an owned copy for the payload
pub fn parse_cidr(path: &FieldPath, raw: &str) -> Result<String, TranslationError> {
    validate_cidr(raw).map_err(|message| path.error(message))?;
    Ok(raw.to_string())
}

/// Validate every CIDR of an unordered collection and return it sorted and
/// de-duplicated; errors point at the offending element
pub fn canonical_cidrs(path: &FieldPath, cidrs: &[String]) -> Result<Vec<String>, TranslationError> {
    let mut out = Vec::with_capacity(cidrs.len());
    for (i, cidr) in cidrs.iter().enumerate() {
        out.push(parse_cidr(&path.index(i), cidr)?);
    }
    out.sort();
    out.dedup();
    Ok(out)
}

/// Sorted, de-duplicated copy of an unordered string collection
pub fn sorted_set(values: &[String]) -> Vec<String> {
    let mut out = values.to_vec();
    out.sort();
    out.dedup();
    out
}

/// Sort an unordered collection of named blocks by name
pub fn sort_by_name<T, F>(items: &mut [T], name: F)
where
    F: Fn(&T) -> &str,
{
    items.sort_by(|a, b| name(a).cmp(name(b)));
}

/// Validate tags and copy them into the payload; empty tags are omitted
pub fn expand_tags(
    path: &FieldPath,
    tags: &BTreeMap<String, String>,
) -> Result<Option<BTreeMap<String, String>>, TranslationError> {
    if tags.len() > MAX_TAGS {
        return Err(path.error(format!(
            "a maximum of {} tags can be applied, got {}",
            MAX_TAGS,
            tags.len()
        )));
    }
    for (key, value) in tags {
        if key.len() > MAX_TAG_KEY_LEN {
            return Err(path.field(key).error(format!(
                "tag keys may be at most {} characters",
                MAX_TAG_KEY_LEN
            )));
        }
        if value.len() > MAX_TAG_VALUE_LEN {
            return Err(path.field(key).error(format!(
                "tag values may be at most {} characters",
                MAX_TAG_VALUE_LEN
            )));
        }
    }

    if tags.is_empty() {
        Ok(None)
    } else {
        Ok(Some(tags.clone()))
    }
}

/// Tags as reported by the remote side; absent means empty
pub fn flatten_tags(tags: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    tags.cloned().unwrap_or_default()
}
