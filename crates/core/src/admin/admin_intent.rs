use serde::{Deserialize, Serialize};

use crate::identity::domain::person::PersonId;

/// A two-system administrative change (store plus folders) that has been
/// started but not yet confirmed complete.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdminIntent {
    Rename {
        person_id: PersonId,
        previous_label: Option<String>,
        previous_folder: String,
        new_name: String,
    },
    Merge {
        target_id: PersonId,
        source_ids: Vec<PersonId>,
        target_folder: String,
        source_folders: Vec<String>,
        /// Evidence count of the target before any source was absorbed.
        target_evidence_len: usize,
    },
}

impl AdminIntent {
    pub fn describe(&self) -> String {
        match self {
            AdminIntent::Rename {
                person_id,
                previous_folder,
                new_name,
                ..
            } => format!("rename {person_id} ('{previous_folder}' -> '{new_name}')"),
            AdminIntent::Merge {
                target_id,
                source_ids,
                ..
            } => {
                let sources: Vec<&str> = source_ids.iter().map(PersonId::as_str).collect();
                format!("merge [{}] into {target_id}", sources.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_form_is_tagged() {
        let intent = AdminIntent::Rename {
            person_id: PersonId::from("P1"),
            previous_label: None,
            previous_folder: "P1".into(),
            new_name: "Alice".into(),
        };

        let json = serde_json::to_value(&intent).unwrap();

        assert_eq!(json["kind"], "rename");
        assert_eq!(json["person_id"], "P1");
        assert!(json["previous_label"].is_null());
    }

    #[test]
    fn test_describe_merge() {
        let intent = AdminIntent::Merge {
            target_id: PersonId::from("A"),
            source_ids: vec![PersonId::from("B"), PersonId::from("C")],
            target_folder: "A".into(),
            source_folders: vec!["B".into(), "C".into()],
            target_evidence_len: 2,
        };
        assert_eq!(intent.describe(), "merge [B, C] into A");
    }
}
