//! Schema - Describe the attributes of a resource kind
//!
//! Each kind declares its attributes: type, whether they are required, filled
//! in by the remote side (computed), force a replacement when changed, or keep
//! their order. The schema validates desired documents and drives the differ.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::differ::ChangeSet;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    String,
    Int,
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    List(Box<AttributeType>),
    /// String-keyed map
    Map(Box<AttributeType>),
    /// Nested block with its own attributes
    Block(Vec<AttributeSchema>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v.eq_ignore_ascii_case(s)) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { base, validate, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|message| TypeError::ValidationFailed { message })
            }

            (AttributeType::List(inner), Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Object(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Block(attributes), Value::Object(map)) => {
                validate_attributes(attributes.iter(), map)
                    .map_err(|mut errors| errors.remove(0))
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: json_type_name(value).to_string(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Block(_) => "Block".to_string(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_f64() => "Float",
        Value::Number(_) => "Int",
        Value::String(_) => "String",
        Value::Array(_) => "List",
        Value::Object(_) => "Map",
    }
}

/// Type error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Attribute '{name}' is computed and cannot be set")]
    ComputedOnly { name: String },

    #[error("Attribute '{name}': {inner}")]
    AttributeError { name: String, inner: Box<TypeError> },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// Filled in by the remote side; an absent desired value is not a change
    pub computed: bool,
    /// Set only by the remote side
    pub read_only: bool,
    /// Changing the value requires replacing the resource
    pub force_new: bool,
    /// List order is significant and kept as the server returns it
    pub ordered: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            computed: false,
            read_only: false,
            force_new: false,
            ordered: false,
            default: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Optional; the remote side picks a value when it is not set
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Reported by the remote side only
    pub fn read_only(mut self) -> Self {
        self.computed = true;
        self.read_only = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

fn validate_attributes<'a>(
    attributes: impl Iterator<Item = &'a AttributeSchema>,
    document: &serde_json::Map<String, Value>,
) -> Result<(), Vec<TypeError>> {
    let mut errors = Vec::new();

    for schema in attributes {
        match document.get(&schema.name) {
            None | Some(Value::Null) => {
                if schema.required && schema.default.is_none() {
                    errors.push(TypeError::MissingRequired {
                        name: schema.name.clone(),
                    });
                }
            }
            Some(_) if schema.read_only => {
                errors.push(TypeError::ComputedOnly {
                    name: schema.name.clone(),
                });
            }
            Some(value) => {
                if let Err(e) = schema.attr_type.validate(value) {
                    errors.push(TypeError::AttributeError {
                        name: schema.name.clone(),
                        inner: Box::new(e),
                    });
                }
            }
        }
        // Unknown attributes are left to the typed document
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: BTreeMap<String, AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: BTreeMap::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    /// Validate a desired document
    pub fn validate(&self, document: &Value) -> Result<(), Vec<TypeError>> {
        match document {
            Value::Object(map) => validate_attributes(self.attributes.values(), map),
            other => Err(vec![TypeError::TypeMismatch {
                expected: "Map".to_string(),
                got: json_type_name(other).to_string(),
            }]),
        }
    }

    /// Changed attributes that cannot be updated in place
    pub fn force_new_fields(&self, changes: &ChangeSet) -> Vec<String> {
        changes
            .iter()
            .filter(|name| self.get(name).is_some_and(|a| a.force_new))
            .cloned()
            .collect()
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;
    use crate::translate::validate_cidr;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value.as_i64() {
                Some(n) if n > 0 => Ok(()),
                Some(_) => Err("Value must be positive".to_string()),
                None => Err("Expected integer".to_string()),
            },
        }
    }

    /// CIDR block type (e.g., "10.0.0.0/16" or "fd00::/64")
    pub fn cidr() -> AttributeType {
        AttributeType::Custom {
            name: "Cidr".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value.as_str() {
                Some(s) => validate_cidr(s),
                None => Err("Expected string".to_string()),
            },
        }
    }

    /// Port, port range or `*` (e.g., "22", "1024-65535")
    pub fn port_range() -> AttributeType {
        AttributeType::Custom {
            name: "PortRange".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                let Some(s) = value.as_str() else {
                    return Err("Expected string".to_string());
                };
                if s == "*" {
                    return Ok(());
                }
                let port = |p: &str| {
                    p.parse::<u16>()
                        .ok()
                        .filter(|p| *p > 0)
                        .ok_or_else(|| format!("Invalid port '{}': must be 1-65535", p))
                };
                match s.split_once('-') {
                    Some((low, high)) => {
                        if port(low)? <= port(high)? {
                            Ok(())
                        } else {
                            Err(format!("Invalid port range '{}': start is after end", s))
                        }
                    }
                    None => port(s).map(|_| ()),
                }
            },
        }
    }

    /// Full ARM resource identifier (e.g., "/subscriptions/.../subnets/internal")
    pub fn resource_id() -> AttributeType {
        AttributeType::Custom {
            name: "ResourceId".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value.as_str() {
                Some(s) if s.starts_with("/subscriptions/") => Ok(()),
                Some(s) => Err(format!("'{}' is not a resource ID", s)),
                None => Err("Expected string".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_string_type() {
        let t = AttributeType::String;
        assert!(t.validate(&json!("hello")).is_ok());
        assert!(t.validate(&json!(42)).is_err());
    }

    #[test]
    fn validate_enum_type() {
        let t = AttributeType::Enum(vec!["Static".to_string(), "Dynamic".to_string()]);
        assert!(t.validate(&json!("Static")).is_ok());
        assert!(t.validate(&json!("dynamic")).is_ok());
        assert!(t.validate(&json!("Sticky")).is_err());
    }

    #[test]
    fn validate_positive_int() {
        let t = types::positive_int();
        assert!(t.validate(&json!(1)).is_ok());
        assert!(t.validate(&json!(0)).is_err());
        assert!(t.validate(&json!(-1)).is_err());
        assert!(t.validate(&json!("1")).is_err());
    }

    #[test]
    fn validate_cidr_type() {
        let t = types::cidr();
        assert!(t.validate(&json!("10.0.0.0/16")).is_ok());
        assert!(t.validate(&json!("fd00::/64")).is_ok());
        assert!(t.validate(&json!("10.0.0.0/33")).is_err());
        assert!(t.validate(&json!(10)).is_err());
    }

    #[test]
    fn validate_port_range_type() {
        let t = types::port_range();
        assert!(t.validate(&json!("*")).is_ok());
        assert!(t.validate(&json!("22")).is_ok());
        assert!(t.validate(&json!("1024-65535")).is_ok());
        assert!(t.validate(&json!("0")).is_err());
        assert!(t.validate(&json!("200-100")).is_err());
        assert!(t.validate(&json!("http")).is_err());
    }

    #[test]
    fn validate_resource_schema() {
        let schema = ResourceSchema::new("resource")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(AttributeSchema::new("count", types::positive_int()))
            .attribute(AttributeSchema::new("enabled", AttributeType::Bool));

        let doc = json!({"name": "my-resource", "count": 5, "enabled": true});
        assert!(schema.validate(&doc).is_ok());
    }

    #[test]
    fn missing_required_attribute() {
        let schema = ResourceSchema::new("nsg")
            .attribute(AttributeSchema::new("name", AttributeType::String).required());

        let errors = schema.validate(&json!({"name": null})).unwrap_err();
        assert_eq!(
            errors,
            vec![TypeError::MissingRequired {
                name: "name".to_string()
            }]
        );
        assert!(schema.validate(&json!([])).is_err());
    }

    #[test]
    fn read_only_attribute_cannot_be_set() {
        let schema = ResourceSchema::new("nic")
            .attribute(AttributeSchema::new("mac_address", AttributeType::String).read_only());
        assert!(schema.validate(&json!({})).is_ok());
        assert!(schema.validate(&json!({"mac_address": "00-0D-3A"})).is_err());
    }

    #[test]
    fn nested_block_errors_name_the_path() {
        let block = AttributeType::Block(vec![
            AttributeSchema::new("name", AttributeType::String).required(),
            AttributeSchema::new("priority", types::positive_int()),
        ]);
        let schema = ResourceSchema::new("nsg").attribute(AttributeSchema::new(
            "security_rule",
            AttributeType::List(Box::new(block)),
        ));

        let errors = schema
            .validate(&json!({"security_rule": [{"name": "a"}, {"priority": 100}]}))
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "Attribute 'security_rule': List item at index 1: Required attribute 'name' is missing"
        );
    }

    #[test]
    fn force_new_fields_filters_changes() {
        let schema = ResourceSchema::new("subnet")
            .attribute(AttributeSchema::new("virtual_network_name", AttributeType::String).force_new())
            .attribute(AttributeSchema::new("service_endpoints", AttributeType::List(Box::new(AttributeType::String))));

        let changes: ChangeSet = ["service_endpoints", "virtual_network_name"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(schema.force_new_fields(&changes), vec!["virtual_network_name".to_string()]);
    }
}
