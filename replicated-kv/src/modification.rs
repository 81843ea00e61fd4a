use serde::{Deserialize, Serialize};

/// What a log entry does to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModificationType {
    Create,
    Update,
    Delete,
    Cas,
}

/// A single entry of the replicated log.
///
/// `sn` is the entry's position in the log, assigned by the leader as the
/// log length at creation time. `id` names the key and is shared by every
/// entry touching that key. On the wire `value` and `old_value` are omitted
/// when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub sn: u64,
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: ModificationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
}

impl Modification {
    pub fn create(sn: u64, id: u64, value: String) -> Self {
        Self::new(sn, id, ModificationType::Create, Some(value), None)
    }

    pub fn update(sn: u64, id: u64, value: String) -> Self {
        Self::new(sn, id, ModificationType::Update, Some(value), None)
    }

    pub fn delete(sn: u64, id: u64) -> Self {
        Self::new(sn, id, ModificationType::Delete, None, None)
    }

    pub fn cas(sn: u64, id: u64, old_value: String, value: String) -> Self {
        Self::new(sn, id, ModificationType::Cas, Some(value), Some(old_value))
    }

    fn new(
        sn: u64,
        id: u64,
        kind: ModificationType,
        value: Option<String>,
        old_value: Option<String>,
    ) -> Self {
        Self {
            sn,
            id,
            kind,
            value,
            old_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_uses_type_names_and_omits_absent_values() {
        let delete = serde_json::to_value(Modification::delete(3, 1)).expect("serialize");
        assert_eq!(delete, json!({"sn": 3, "id": 1, "type": "DELETE"}));

        let cas = serde_json::to_value(Modification::cas(4, 1, "a".into(), "b".into()))
            .expect("serialize");
        assert_eq!(
            cas,
            json!({"sn": 4, "id": 1, "type": "CAS", "value": "b", "old_value": "a"})
        );
    }

    #[test]
    fn parses_entries_without_optional_fields() {
        let parsed: Modification =
            serde_json::from_value(json!({"sn": 0, "id": 0, "type": "UPDATE"})).expect("parse");
        assert_eq!(parsed.kind, ModificationType::Update);
        assert_eq!(parsed.value, None);
        assert_eq!(parsed.old_value, None);
    }
}
