//! Attribute definitions, raw (as declared) and normalized.

use serde::Deserialize;
use serde_json::Value;

/// Storage type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Number,
    Boolean,
    Json,
    /// Untyped columns and foreign keys
    #[default]
    #[serde(alias = "ref")]
    None,
}

impl AttributeType {
    /// Value substituted for null in a column that disallows null
    ///
    /// Only the scalar types have one; `json` and untyped attributes are left as they are.
    pub fn zero_value(self) -> Option<Value> {
        match self {
            AttributeType::String => Some(Value::String(String::new())),
            AttributeType::Number => Some(Value::from(0)),
            AttributeType::Boolean => Some(Value::Bool(false)),
            AttributeType::Json | AttributeType::None => None,
        }
    }
}

/// Structured validation rules of an attribute
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Validation {
    /// Values a write may carry; empty means unrestricted
    pub allowed_values: Vec<Value>,
}

impl Validation {
    pub fn allows(&self, value: &Value) -> bool {
        self.allowed_values.is_empty() || self.allowed_values.contains(value)
    }
}

/// Normalized attribute of a [`Schema`](super::Schema)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeDef {
    pub ty: AttributeType,
    pub allow_null: bool,
    pub defaults_to: Option<Value>,
    pub auto_created_at: bool,
    pub auto_updated_at: bool,
    pub auto_increment: bool,
    /// Entity referenced by a foreign-key attribute
    pub related_entity: Option<String>,
    pub validation: Option<Validation>,
}

impl AttributeDef {
    pub fn new(ty: AttributeType) -> Self {
        Self {
            ty,
            ..Self::default()
        }
    }

    pub fn string() -> Self {
        Self::new(AttributeType::String)
    }

    pub fn number() -> Self {
        Self::new(AttributeType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(AttributeType::Boolean)
    }

    pub fn json() -> Self {
        Self::new(AttributeType::Json)
    }

    /// Foreign key to `entity`
    pub fn references(entity: impl Into<String>) -> Self {
        Self {
            related_entity: Some(entity.into()),
            ..Self::default()
        }
    }

    pub fn allow_null(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn defaults_to(mut self, value: impl Into<Value>) -> Self {
        self.defaults_to = Some(value.into());
        self
    }

    pub fn auto_created_at(mut self) -> Self {
        self.auto_created_at = true;
        self
    }

    pub fn auto_updated_at(mut self) -> Self {
        self.auto_updated_at = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn allowed_values(mut self, values: Vec<Value>) -> Self {
        self.validation = Some(Validation {
            allowed_values: values,
        });
        self
    }

    pub fn is_json(&self) -> bool {
        self.ty == AttributeType::Json
    }

    pub fn is_number(&self) -> bool {
        self.ty == AttributeType::Number
    }
}

/// Attribute as declared in a model definition
///
/// Keys follow the declaration format (`allowNull`, `defaultsTo`, `isIn`, ...).
/// Keys this crate does not act on are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttribute {
    #[serde(rename = "type", default)]
    pub ty: Option<AttributeType>,
    #[serde(default)]
    pub allow_null: bool,
    #[serde(default)]
    pub defaults_to: Option<Value>,
    #[serde(default)]
    pub auto_created_at: bool,
    #[serde(default)]
    pub auto_updated_at: bool,
    #[serde(default)]
    pub auto_increment: bool,
    /// Related entity name
    #[serde(default)]
    pub model: Option<String>,
    /// Shorthand for `validations.isIn`
    #[serde(default)]
    pub is_in: Option<Vec<Value>>,
    #[serde(default)]
    pub validations: Option<RawValidations>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawValidations {
    #[serde(default)]
    pub is_in: Option<Vec<Value>>,
}

impl From<&RawAttribute> for AttributeDef {
    fn from(raw: &RawAttribute) -> Self {
        // `isIn` on the attribute itself wins over `validations.isIn`
        let allowed = raw.is_in.clone().or_else(|| {
            raw.validations
                .as_ref()
                .and_then(|validations| validations.is_in.clone())
        });

        AttributeDef {
            ty: raw.ty.unwrap_or_default(),
            allow_null: raw.allow_null,
            defaults_to: raw.defaults_to.clone(),
            auto_created_at: raw.auto_created_at,
            auto_updated_at: raw.auto_updated_at,
            auto_increment: raw.auto_increment,
            related_entity: raw.model.clone(),
            validation: allowed.map(|allowed_values| Validation { allowed_values }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zero_values() {
        assert_eq!(AttributeType::String.zero_value(), Some(json!("")));
        assert_eq!(AttributeType::Number.zero_value(), Some(json!(0)));
        assert_eq!(AttributeType::Boolean.zero_value(), Some(json!(false)));
        assert_eq!(AttributeType::Json.zero_value(), None);
        assert_eq!(AttributeType::None.zero_value(), None);
    }

    #[test]
    fn test_raw_attribute_is_in_shorthand_becomes_validation() {
        let raw: RawAttribute =
            serde_json::from_value(json!({ "type": "string", "isIn": ["red", "green"] })).unwrap();
        let def = AttributeDef::from(&raw);

        assert_eq!(def.ty, AttributeType::String);
        let validation = def.validation.unwrap();
        assert_eq!(validation.allowed_values, vec![json!("red"), json!("green")]);
        assert!(validation.allows(&json!("red")));
        assert!(!validation.allows(&json!("blue")));
    }

    #[test]
    fn test_raw_attribute_nested_validations() {
        let raw: RawAttribute =
            serde_json::from_value(json!({ "type": "number", "validations": { "isIn": [1, 2] } }))
                .unwrap();
        let def = AttributeDef::from(&raw);
        assert_eq!(def.validation.unwrap().allowed_values, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_raw_attribute_foreign_key_and_flags() {
        let raw: RawAttribute = serde_json::from_value(json!({
            "model": "simple",
            "columnName": "ignored"
        }))
        .unwrap();
        let def = AttributeDef::from(&raw);
        assert_eq!(def.ty, AttributeType::None);
        assert_eq!(def.related_entity.as_deref(), Some("simple"));

        let raw: RawAttribute = serde_json::from_value(json!({
            "type": "number",
            "autoCreatedAt": true,
            "allowNull": true
        }))
        .unwrap();
        let def = AttributeDef::from(&raw);
        assert!(def.auto_created_at);
        assert!(def.allow_null);
        assert!(!def.auto_updated_at);
    }

    #[test]
    fn test_ref_type_alias() {
        let raw: RawAttribute = serde_json::from_value(json!({ "type": "ref" })).unwrap();
        assert_eq!(AttributeDef::from(&raw).ty, AttributeType::None);
    }
}
