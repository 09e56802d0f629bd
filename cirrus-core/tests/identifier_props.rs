//! Property-based tests for identifier parsing
//!
//! Formatting a parsed identifier and parsing it again must give the same
//! identifier, whatever casing the keys and literals arrived in.

use cirrus_core::{CoreError, IdSchema, Segment, parse_composite};
use proptest::prelude::*;

static SUBNET: IdSchema = IdSchema::new(
    "Subnet",
    &[
        Segment::value("subscriptions", "subscriptionId"),
        Segment::value("resourceGroups", "resourceGroupName"),
        Segment::literal("providers", "Microsoft.Network"),
        Segment::value("virtualNetworks", "virtualNetworkName"),
        Segment::value("subnets", "subnetName"),
    ],
);

static PUBLIC_IP: IdSchema = IdSchema::new(
    "Public IP Address",
    &[
        Segment::value("subscriptions", "subscriptionId"),
        Segment::value("resourceGroups", "resourceGroupName"),
        Segment::literal("providers", "Microsoft.Network"),
        Segment::value("publicIPAddresses", "publicIpAddressName"),
    ],
);

/// Names as ARM allows them: no slashes, no pipes
fn arb_name() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9._()-]{0,40}"
}

fn arb_values() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(arb_name(), 4)
}

/// Flip the case of ASCII letters wherever `mask` says so
fn scramble(s: &str, mask: u64) -> String {
    s.chars()
        .enumerate()
        .map(|(i, c)| {
            if mask & (1 << (i % 64)) != 0 {
                if c.is_ascii_lowercase() {
                    c.to_ascii_uppercase()
                } else {
                    c.to_ascii_lowercase()
                }
            } else {
                c
            }
        })
        .collect()
}

proptest! {
    #[test]
    fn format_parse_is_a_fixed_point(values in arb_values()) {
        let id = SUBNET.build(&values).unwrap();
        let formatted = id.format();
        let reparsed = SUBNET.parse(&formatted).unwrap();

        prop_assert_eq!(&reparsed, &id);
        prop_assert_eq!(reparsed.format(), formatted);
    }

    #[test]
    fn keys_and_literals_match_case_insensitively(values in arb_values(), mask in any::<u64>()) {
        let id = SUBNET.build(&values).unwrap();

        // Scramble only the schema-owned parts of the path
        let mut raw = String::new();
        let mut user = values.iter();
        for segment in SUBNET.segments {
            raw.push('/');
            raw.push_str(&scramble(segment.key(), mask));
            raw.push('/');
            match segment {
                Segment::Literal { value, .. } => raw.push_str(&scramble(value, mask.rotate_left(7))),
                Segment::Value { .. } => raw.push_str(user.next().unwrap()),
            }
        }

        let parsed = SUBNET.parse(&raw).unwrap();
        prop_assert_eq!(parsed.format(), id.format());
        prop_assert_eq!(parsed.values(), id.values());
    }

    #[test]
    fn values_keep_their_case(values in arb_values()) {
        let upper: Vec<String> = values.iter().map(|v| v.to_uppercase()).collect();
        let id = SUBNET.build(&values).unwrap();
        let other = SUBNET.build(&upper).unwrap();

        prop_assert_eq!(id == other, values == upper);
        prop_assert!(id.is_same(&other.format()));
    }

    #[test]
    fn composite_splits_into_its_parts(subnet in arb_values(), ip in prop::collection::vec(arb_name(), 3)) {
        let first = SUBNET.build(&subnet).unwrap();
        let second = PUBLIC_IP.build(&ip).unwrap();
        let raw = format!("{}|{}", first, second);

        let composite = parse_composite(&raw, [&SUBNET, &PUBLIC_IP]).unwrap();
        prop_assert_eq!(&composite.first, &first);
        prop_assert_eq!(&composite.second, &second);
        prop_assert_eq!(composite.to_string(), raw);
    }

    #[test]
    fn extra_delimiters_are_rejected(subnet in arb_values(), extra in 2usize..5) {
        let first = SUBNET.build(&subnet).unwrap().format();
        let raw = vec![first; extra].join("|");

        let err = parse_composite(&raw, [&SUBNET, &SUBNET]);
        let is_malformed = matches!(err, Err(CoreError::MalformedIdentifier { .. }));
        prop_assert!(is_malformed);
    }

    #[test]
    fn truncated_paths_are_rejected(values in arb_values(), cut in 1usize..10) {
        let formatted = SUBNET.build(&values).unwrap().format();
        let parts: Vec<&str> = formatted.split('/').collect();
        let truncated = parts[..parts.len() - cut].join("/");

        let is_malformed = matches!(
            SUBNET.parse(&truncated),
            Err(CoreError::MalformedIdentifier { .. })
        );
        prop_assert!(is_malformed);
    }
}
