use std::sync::OnceLock;

use jsonschema::Validator;
use serde_json::Value;

use crate::error::{DvnetError, DvnetResult};

/// JSON schema the topology definition must satisfy before it is even parsed
/// into `RawNetDef`. Kept intentionally loose on nested shapes (those are
/// enforced by `validator` derives once the definition is deserialized) and
/// strict on the fields the rest of the crate assumes are always present.
const NET_DEF_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["name", "subnets", "routers"],
  "properties": {
    "name": { "type": "string", "minLength": 1 },
    "outbound_access": {
      "type": "object",
      "properties": {
        "enabled": { "type": "boolean" },
        "hop_cidr": { "type": "string" }
      }
    },
    "update_hosts": { "type": "boolean" },
    "automatic_routing": { "type": "boolean" },
    "subnets": {
      "type": "object",
      "additionalProperties": {
        "type": "object",
        "required": ["cidr", "hosts"],
        "properties": {
          "cidr": { "type": "string", "minLength": 1 },
          "hosts": {
            "type": "object",
            "additionalProperties": {
              "type": "object",
              "required": ["image"],
              "properties": { "image": { "type": "string", "minLength": 1 } }
            }
          }
        }
      }
    },
    "routers": {
      "type": "object",
      "additionalProperties": {
        "type": "object",
        "required": ["image", "subnets"],
        "properties": {
          "image": { "type": "string", "minLength": 1 },
          "subnets": {
            "type": "array",
            "items": { "type": "string" }
          },
          "fw_rules": { "type": "object" }
        }
      }
    }
  }
}"#;

fn compiled() -> &'static Validator {
    static SCHEMA: OnceLock<Validator> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let schema: Value =
            serde_json::from_str(NET_DEF_SCHEMA).expect("embedded schema is valid JSON");
        jsonschema::validator_for(&schema).expect("embedded schema compiles")
    })
}

/// Validates a raw topology definition document against the schema above.
/// Unknown top-level fields are ignored by the schema; only shape and
/// required-field violations fail here.
pub fn validate(doc: &Value) -> DvnetResult<()> {
    let validator = compiled();
    let errors: Vec<String> = validator.iter_errors(doc).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(DvnetError::validation(format!(
            "topology definition failed schema validation: {}",
            errors.join("; ")
        )))
    }
}
