// Configuration entry types and value parsing
//
// Secrets are stored encrypted and stay encrypted in every cache tier;
// decryption happens only in the resolver's `get` path.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Declared type of a configuration value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    String,
    Int,
    Bool,
    Json,
    Secret,
}

impl ConfigType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigType::String => "string",
            ConfigType::Int => "int",
            ConfigType::Bool => "bool",
            ConfigType::Json => "json",
            ConfigType::Secret => "secret",
        }
    }
}

impl std::str::FromStr for ConfigType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "string" => Ok(ConfigType::String),
            "int" => Ok(ConfigType::Int),
            "bool" => Ok(ConfigType::Bool),
            "json" => Ok(ConfigType::Json),
            "secret" => Ok(ConfigType::Secret),
            other => Err(Error::validation(format!("unknown config type '{other}'"))),
        }
    }
}

/// A config entry as held in the per-scope map (and the Redis hash).
/// For `Secret` entries `value` is still ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub value: String,
    #[serde(rename = "type")]
    pub config_type: ConfigType,
}

/// A resolved, typed configuration value
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Bool(bool),
    Json(serde_json::Value),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Parse a raw string according to the declared type.
///
/// Decryption happens before this is called; the decrypted form of a
/// secret is already a plain string and parses as `String`.
pub fn parse_value(raw: &str, config_type: ConfigType) -> Result<ConfigValue> {
    match config_type {
        ConfigType::String | ConfigType::Secret => Ok(ConfigValue::String(raw.to_string())),
        ConfigType::Int => raw
            .trim()
            .parse::<i64>()
            .map(ConfigValue::Int)
            .map_err(|_| Error::validation(format!("invalid int config value '{raw}'"))),
        ConfigType::Bool => {
            let lowered = raw.trim().to_lowercase();
            Ok(ConfigValue::Bool(matches!(
                lowered.as_str(),
                "true" | "1" | "yes"
            )))
        }
        ConfigType::Json => serde_json::from_str(raw)
            .map(ConfigValue::Json)
            .map_err(|e| Error::validation(format!("invalid json config value: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_int() {
        assert_eq!(
            parse_value("42", ConfigType::Int).unwrap(),
            ConfigValue::Int(42)
        );
        assert_eq!(
            parse_value(" -7 ", ConfigType::Int).unwrap(),
            ConfigValue::Int(-7)
        );
        assert!(parse_value("forty", ConfigType::Int).is_err());
    }

    #[test]
    fn parses_bool_truthy_set() {
        for truthy in ["true", "TRUE", "1", "yes", "Yes"] {
            assert_eq!(
                parse_value(truthy, ConfigType::Bool).unwrap(),
                ConfigValue::Bool(true),
                "{truthy} should be true"
            );
        }
        for falsy in ["false", "0", "no", "anything"] {
            assert_eq!(
                parse_value(falsy, ConfigType::Bool).unwrap(),
                ConfigValue::Bool(false)
            );
        }
    }

    #[test]
    fn parses_json_strictly() {
        let parsed = parse_value(r#"{"a": [1, 2]}"#, ConfigType::Json).unwrap();
        assert_eq!(
            parsed,
            ConfigValue::Json(serde_json::json!({"a": [1, 2]}))
        );
        assert!(parse_value("{not json", ConfigType::Json).is_err());
    }

    #[test]
    fn strings_pass_through() {
        assert_eq!(
            parse_value("as-is", ConfigType::String).unwrap(),
            ConfigValue::String("as-is".into())
        );
    }

    #[test]
    fn entry_serde_uses_type_tag() {
        let entry = ConfigEntry {
            value: "ciphertext".into(),
            config_type: ConfigType::Secret,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({"value": "ciphertext", "type": "secret"}));
    }
}
