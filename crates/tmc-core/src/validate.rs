//! Thing Model validation before import.

use jsonschema::JSONSchema;
use serde_json::Value;
use tmc_model::{RepoError, ThingModel};

const TM_STRUCTURE_SCHEMA: &str = include_str!("../schemas/tm-structure.schema.json");
const TMC_MANDATORY_SCHEMA: &str = include_str!("../schemas/tmc-mandatory.schema.json");

fn check(schema_src: &str, label: &str, instance: &Value) -> Result<(), RepoError> {
    let schema: Value = serde_json::from_str(schema_src)?;
    let compiled = JSONSchema::compile(&schema)
        .map_err(|e| RepoError::InvalidInput(format!("{label} schema does not compile: {e}")))?;
    if let Err(errors) = compiled.validate(instance) {
        let details = errors
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{path}: {err}")
                }
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Err(RepoError::InvalidInput(format!("{label} validation failed: {details}")));
    }
    Ok(())
}

/// Validate a raw TM against the structural TM schema and the fields the
/// catalog requires, returning its parsed header.
pub fn validate_tm(raw: &[u8]) -> Result<ThingModel, RepoError> {
    let instance: Value = serde_json::from_slice(raw)
        .map_err(|e| RepoError::InvalidInput(format!("TM is not valid JSON: {e}")))?;
    if !instance.is_object() {
        return Err(RepoError::InvalidInput("TM must be a JSON object".to_owned()));
    }
    check(TM_STRUCTURE_SCHEMA, "TM", &instance)?;
    check(TMC_MANDATORY_SCHEMA, "catalog", &instance)?;
    ThingModel::from_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_minimal_catalog_tm() {
        let tm = validate_tm(
            br#"{"schema:author":{"name":"a-corp"},"schema:manufacturer":{"name":"eagle"},"schema:mpn":"BT2000","version":{"model":"v1.0.0"}}"#,
        )
        .unwrap();
        assert_eq!(tm.mpn(), Some("BT2000"));
    }

    #[test]
    fn reports_missing_mandatory_fields() {
        let err = validate_tm(br#"{"schema:author":{"name":"a-corp"},"schema:mpn":"X"}"#)
            .unwrap_err()
            .to_string();
        assert!(err.contains("catalog validation failed"), "{err}");
        assert!(err.contains("schema:manufacturer"), "{err}");
    }

    #[test]
    fn reports_structural_errors() {
        let err = validate_tm(
            br#"{"schema:author":{"name":"a"},"schema:manufacturer":{"name":"b"},"schema:mpn":"c","links":[{"rel":"x"}]}"#,
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("TM validation failed"), "{err}");
        assert!(err.contains("/links/0"), "{err}");
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(validate_tm(b"[1]"), Err(RepoError::InvalidInput(_))));
        assert!(matches!(validate_tm(b"{"), Err(RepoError::InvalidInput(_))));
    }
}
