//! Identifier - Hierarchical and composite resource identifiers
//!
//! A resource identifier is a path of `key/value` pairs such as
//! `/subscriptions/{id}/resourceGroups/{name}/providers/Microsoft.Network/networkInterfaces/{name}`.
//! Every resource type declares the expected shape as a static [`IdSchema`].
//! Keys and literal values match case-insensitively; user values are kept verbatim.

use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Delimiter joining the two halves of a [`CompositeIdentifier`]
pub const COMPOSITE_DELIMITER: char = '|';

/// One `key/value` pair of an identifier schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Key followed by a user value, e.g. `resourceGroups/{resourceGroupName}`
    Value {
        key: &'static str,
        name: &'static str,
    },
    /// Key followed by a fixed value, e.g. `providers/Microsoft.Network`
    Literal {
        key: &'static str,
        value: &'static str,
    },
}

impl Segment {
    pub const fn value(key: &'static str, name: &'static str) -> Self {
        Self::Value { key, name }
    }

    pub const fn literal(key: &'static str, value: &'static str) -> Self {
        Self::Literal { key, value }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Segment::Value { key, .. } | Segment::Literal { key, .. } => key,
        }
    }
}

/// Expected shape of one kind of identifier
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct IdSchema {
    /// Human readable kind, used in error messages (e.g. "Network Interface")
    pub kind: &'static str,
    pub segments: &'static [Segment],
}

impl IdSchema {
    pub const fn new(kind: &'static str, segments: &'static [Segment]) -> Self {
        Self { kind, segments }
    }

    /// Names of the user-supplied values, in path order
    pub fn value_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Value { name, .. } => Some(*name),
            Segment::Literal { .. } => None,
        })
    }

    /// Parse a raw identifier string against this schema
    pub fn parse(&'static self, raw: &str) -> CoreResult<ResourceIdentifier> {
        let path = raw
            .strip_prefix('/')
            .ok_or_else(|| CoreError::malformed(raw, "expected the ID to start with '/'"))?;
        let path = path.strip_suffix('/').unwrap_or(path);

        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() * 2 {
            return Err(CoreError::malformed(
                raw,
                format!(
                    "expected {} segments for a {} ID but got {}",
                    self.segments.len() * 2,
                    self.kind,
                    parts.len()
                ),
            ));
        }

        let mut values = Vec::with_capacity(self.segments.len());
        for (pair, segment) in parts.chunks(2).zip(self.segments) {
            let (key, value) = (pair[0], pair[1]);
            if !key.eq_ignore_ascii_case(segment.key()) {
                return Err(CoreError::malformed(
                    raw,
                    format!("expected segment {:?} but got {:?}", segment.key(), key),
                ));
            }
            if value.is_empty() {
                return Err(CoreError::malformed(
                    raw,
                    format!("segment {:?} has an empty value", segment.key()),
                ));
            }
            match segment {
                Segment::Literal { value: literal, .. } => {
                    if !value.eq_ignore_ascii_case(literal) {
                        return Err(CoreError::malformed(
                            raw,
                            format!(
                                "expected {:?} to be {:?} but got {:?}",
                                segment.key(),
                                literal,
                                value
                            ),
                        ));
                    }
                }
                Segment::Value { .. } => values.push(value.to_string()),
            }
        }

        Ok(ResourceIdentifier {
            schema: self,
            values,
        })
    }

    /// Build an identifier from its user values, in path order
    pub fn build<S: AsRef<str>>(&'static self, values: &[S]) -> CoreResult<ResourceIdentifier> {
        let expected = self.value_names().count();
        if values.len() != expected {
            return Err(CoreError::malformed(
                values
                    .iter()
                    .map(|v| v.as_ref())
                    .collect::<Vec<_>>()
                    .join("/"),
                format!(
                    "a {} ID needs {} values but {} were given",
                    self.kind,
                    expected,
                    values.len()
                ),
            ));
        }

        let mut owned = Vec::with_capacity(values.len());
        for (value, name) in values.iter().zip(self.value_names()) {
            let value = value.as_ref();
            if value.is_empty() || value.contains('/') || value.contains(COMPOSITE_DELIMITER) {
                return Err(CoreError::malformed(
                    value,
                    format!("{:?} is not a valid value for {}", value, name),
                ));
            }
            owned.push(value.to_string());
        }

        Ok(ResourceIdentifier {
            schema: self,
            values: owned,
        })
    }
}

/// A parsed hierarchical identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentifier {
    schema: &'static IdSchema,
    values: Vec<String>,
}

impl ResourceIdentifier {
    pub fn schema(&self) -> &'static IdSchema {
        self.schema
    }

    /// Look up a user value by its schema name (e.g. "resourceGroupName")
    pub fn value(&self, name: &str) -> Option<&str> {
        self.schema
            .value_names()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    /// The last user value, which names the object itself
    pub fn name(&self) -> &str {
        self.values.last().map(String::as_str).unwrap_or_default()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Canonical string form
    pub fn format(&self) -> String {
        let mut out = String::new();
        let mut values = self.values.iter();
        for segment in self.schema.segments {
            out.push('/');
            out.push_str(segment.key());
            out.push('/');
            match segment {
                Segment::Literal { value, .. } => out.push_str(value),
                Segment::Value { .. } => {
                    if let Some(v) = values.next() {
                        out.push_str(v);
                    }
                }
            }
        }
        out
    }

    /// Compare against an identifier string echoed back by the remote API,
    /// which does not preserve casing
    pub fn is_same(&self, raw: &str) -> bool {
        let raw = raw.strip_suffix('/').unwrap_or(raw);
        self.format().eq_ignore_ascii_case(raw)
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

/// Two identifiers joined by [`COMPOSITE_DELIMITER`], addressing an
/// association that has no remote object of its own
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeIdentifier {
    pub first: ResourceIdentifier,
    pub second: ResourceIdentifier,
}

impl CompositeIdentifier {
    pub fn new(first: ResourceIdentifier, second: ResourceIdentifier) -> Self {
        Self { first, second }
    }

    pub fn format(&self) -> String {
        format!(
            "{}{}{}",
            self.first.format(),
            COMPOSITE_DELIMITER,
            self.second.format()
        )
    }
}

impl fmt::Display for CompositeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

/// Split a composite identifier and parse each half with its own schema
pub fn parse_composite(
    raw: &str,
    schemas: [&'static IdSchema; 2],
) -> CoreResult<CompositeIdentifier> {
    let parts: Vec<&str> = raw.split(COMPOSITE_DELIMITER).collect();
    if parts.len() != 2 {
        return Err(CoreError::malformed(
            raw,
            format!(
                "expected 2 identifiers separated by '{}' but got {}",
                COMPOSITE_DELIMITER,
                parts.len()
            ),
        ));
    }

    let half = |index: usize| {
        schemas[index].parse(parts[index]).map_err(|e| match e {
            CoreError::MalformedIdentifier { reason, .. } => CoreError::malformed(
                raw,
                format!("parsing {} ID: {}", schemas[index].kind, reason),
            ),
            other => other,
        })
    };

    Ok(CompositeIdentifier {
        first: half(0)?,
        second: half(1)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    static GROUP: IdSchema = IdSchema::new(
        "Resource Group",
        &[
            Segment::value("subscriptions", "subscriptionId"),
            Segment::value("resourceGroups", "resourceGroupName"),
        ],
    );

    static NETWORK: IdSchema = IdSchema::new(
        "Virtual Network",
        &[
            Segment::value("subscriptions", "subscriptionId"),
            Segment::value("resourceGroups", "resourceGroupName"),
            Segment::literal("providers", "Microsoft.Network"),
            Segment::value("virtualNetworks", "virtualNetworkName"),
        ],
    );

    const NETWORK_ID: &str =
        "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/virtualNetworks/vnet1";

    #[test]
    fn parse_extracts_values() {
        let id = NETWORK.parse(NETWORK_ID).unwrap();
        assert_eq!(id.value("subscriptionId"), Some("0000"));
        assert_eq!(id.value("resourceGroupName"), Some("rg1"));
        assert_eq!(id.value("virtualNetworkName"), Some("vnet1"));
        assert_eq!(id.value("nope"), None);
        assert_eq!(id.name(), "vnet1");
        assert_eq!(id.format(), NETWORK_ID);
    }

    #[test]
    fn parse_canonicalizes_key_and_literal_casing() {
        let id = NETWORK
            .parse("/SUBSCRIPTIONS/0000/resourcegroups/RG1/Providers/microsoft.network/VirtualNetworks/VNet1")
            .unwrap();
        // values keep their casing, keys and literals are normalized
        assert_eq!(
            id.format(),
            "/subscriptions/0000/resourceGroups/RG1/providers/Microsoft.Network/virtualNetworks/VNet1"
        );
    }

    #[test]
    fn parse_tolerates_trailing_slash() {
        let id = GROUP.parse("/subscriptions/0000/resourceGroups/rg1/").unwrap();
        assert_eq!(id.format(), "/subscriptions/0000/resourceGroups/rg1");
    }

    #[test]
    fn parse_rejects_wrong_shapes() {
        let cases = [
            "",
            "subscriptions/0000/resourceGroups/rg1",
            "/subscriptions/0000",
            "/subscriptions/0000/resourceGroups/rg1/extra",
            "/subscriptions/0000/resourceGroups/",
            "/subscriptions/0000/resourcegroupz/rg1",
            "/subscriptions//resourceGroups/rg1",
        ];
        for raw in cases {
            let err = GROUP.parse(raw).unwrap_err();
            assert!(
                matches!(err, CoreError::MalformedIdentifier { .. }),
                "{} should be malformed",
                raw
            );
        }
    }

    #[test]
    fn parse_rejects_wrong_literal() {
        let raw = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Compute/virtualNetworks/vnet1";
        let err = NETWORK.parse(raw).unwrap_err();
        assert!(err.to_string().contains("Microsoft.Network"));
    }

    #[test]
    fn build_validates_values() {
        let id = GROUP.build(&["0000", "rg1"]).unwrap();
        assert_eq!(id.format(), "/subscriptions/0000/resourceGroups/rg1");

        assert!(GROUP.build(&["0000"]).is_err());
        assert!(GROUP.build(&["0000", ""]).is_err());
        assert!(GROUP.build(&["0000", "a/b"]).is_err());
        assert!(GROUP.build(&["0000", "a|b"]).is_err());
    }

    #[test]
    fn is_same_matches_echoed_ids() {
        let id = NETWORK.parse(NETWORK_ID).unwrap();
        assert!(id.is_same(&NETWORK_ID.to_uppercase()));
        assert!(!id.is_same("/subscriptions/0000"));
    }

    #[test]
    fn composite_splits_into_two_parses() {
        let raw = format!("{}|/subscriptions/0000/resourceGroups/rg1", NETWORK_ID);
        let composite = parse_composite(&raw, [&NETWORK, &GROUP]).unwrap();
        assert_eq!(composite.first, NETWORK.parse(NETWORK_ID).unwrap());
        assert_eq!(
            composite.second,
            GROUP.parse("/subscriptions/0000/resourceGroups/rg1").unwrap()
        );
        assert_eq!(composite.to_string(), raw);
    }

    #[test]
    fn composite_requires_exactly_one_delimiter() {
        let group = "/subscriptions/0000/resourceGroups/rg1";
        for raw in [
            NETWORK_ID.to_string(),
            format!("{}|{}|{}", NETWORK_ID, group, group),
            "|".to_string(),
        ] {
            let err = parse_composite(&raw, [&NETWORK, &GROUP]).unwrap_err();
            assert!(matches!(err, CoreError::MalformedIdentifier { .. }));
        }
    }

    #[test]
    fn composite_reports_which_half_failed() {
        let raw = format!("{}|/subscriptions/0000", NETWORK_ID);
        let err = parse_composite(&raw, [&NETWORK, &GROUP]).unwrap_err();
        match err {
            CoreError::MalformedIdentifier { input, reason } => {
                assert_eq!(input, raw);
                assert!(reason.contains("Resource Group"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
