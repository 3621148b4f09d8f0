use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::identity::domain::embedding::{l2_normalize, Embedding};

/// Stable identity key, assigned once at creation.
///
/// Ordering is lexicographic and doubles as the deterministic tie-break
/// when several persons match a face equally well.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(String);

impl PersonId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersonId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One identity and the face evidence collected for it.
///
/// `embeddings[i]` was observed in `representative_image_paths[i]`; the two
/// sequences always have the same length and are in arrival order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub person_id: PersonId,
    #[serde(default)]
    pub name_label: Option<String>,
    pub embeddings: Vec<Embedding>,
    pub representative_image_paths: Vec<PathBuf>,
    pub representative_embedding: Embedding,
}

impl Person {
    /// A new identity seeded with its first observation.
    pub fn seeded(person_id: PersonId, embedding: Embedding, image_path: PathBuf) -> Self {
        let mut representative = embedding.clone();
        l2_normalize(&mut representative);
        Self {
            person_id,
            name_label: None,
            embeddings: vec![embedding],
            representative_image_paths: vec![image_path],
            representative_embedding: representative,
        }
    }

    /// Folder name for this person: the label when set, else the id.
    pub fn display_name(&self) -> &str {
        match self.name_label.as_deref() {
            Some(label) if !label.trim().is_empty() => label,
            _ => self.person_id.as_str(),
        }
    }

    pub fn evidence_count(&self) -> usize {
        self.embeddings.len()
    }

    pub fn dimension(&self) -> usize {
        self.representative_embedding.len()
    }

    /// Checks the record-level invariants enforced at the store boundary.
    pub fn validate(&self) -> Result<(), String> {
        if self.person_id.as_str().is_empty() {
            return Err("person_id must not be empty".into());
        }
        if self.embeddings.is_empty() {
            return Err(format!("{} has no embeddings", self.person_id));
        }
        if self.embeddings.len() != self.representative_image_paths.len() {
            return Err(format!(
                "{} has {} embeddings but {} image paths",
                self.person_id,
                self.embeddings.len(),
                self.representative_image_paths.len()
            ));
        }
        let dim = self.representative_embedding.len();
        if dim == 0 {
            return Err(format!("{} has an empty representative", self.person_id));
        }
        for e in self.embeddings.iter().chain(Some(&self.representative_embedding)) {
            if e.len() != dim {
                return Err(format!(
                    "{} mixes embedding dimensions {} and {}",
                    self.person_id,
                    dim,
                    e.len()
                ));
            }
            if e.iter().any(|x| !x.is_finite()) {
                return Err(format!("{} has a non-finite embedding", self.person_id));
            }
        }
        Ok(())
    }
}
