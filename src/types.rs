//! Public data types: identifiers, cached manifestation content and the consolidated work document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use unicode_normalization::UnicodeNormalization;

/// Point in time as reported by the repository (millisecond precision).
pub type Timestamp = DateTime<Utc>;

/// Prefix of data streams that carry one manifestation each.
pub const LOCAL_DATA_PREFIX: &str = "localData.";

/// Type label given to values whose declared type is missing or empty.
pub const DEFAULT_TYPE: &str = "not specified";

/// Prefix of job ids that name a work.
pub const WORK_ID_PREFIX: &str = "work:";

/// Derive the manifestation id for `stream` of repository object `repository_id`.
///
/// `localData.870970` of `870970-basis:12345678` becomes `870970:12345678`. Returns `None`
/// when the stream is not a local-data stream.
pub fn manifestation_id(repository_id: &str, stream: &str) -> Option<String> {
    let agency = stream.strip_prefix(LOCAL_DATA_PREFIX)?;
    if agency.is_empty() {
        return None;
    }
    let local = repository_id
        .split_once(':')
        .map_or(repository_id, |(_, rest)| rest);
    Some(format!("{agency}:{local}"))
}

/// Stable id under which the work document is stored, owned by its primary manifestation.
pub fn persistent_work_id(primary_manifestation_id: &str) -> String {
    format!("work-of-{primary_manifestation_id}")
}

/// A value with a declared type, e.g. a creator with a role or a subject with a vocabulary.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,
    pub value: String,
}

impl TypedValue {
    pub fn new(value_type: &str, value: &str) -> Self {
        Self {
            value_type: Some(value_type.to_string()),
            value: value.to_string(),
        }
    }

    pub fn untyped(value: &str) -> Self {
        Self {
            value_type: None,
            value: value.to_string(),
        }
    }

    /// Merge values that only differ by case (after NFC normalization) within the same type.
    ///
    /// A missing or empty type becomes [`DEFAULT_TYPE`]. When two spellings collide, a spelling
    /// with capitals wins over an all-lowercase one; otherwise the first one seen is kept. Output
    /// order is first-seen order of each distinct `(type, key)`.
    pub fn distinct_set<'a, I>(values: I) -> Vec<TypedValue>
    where
        I: IntoIterator<Item = &'a TypedValue>,
    {
        let mut order: Vec<(String, String)> = Vec::new();
        let mut chosen: HashMap<(String, String), String> = HashMap::new();
        for tv in values {
            let value_type = match tv.value_type.as_deref() {
                None | Some("") => DEFAULT_TYPE.to_string(),
                Some(t) => t.to_string(),
            };
            let normalized: String = tv.value.nfc().collect();
            let key = (value_type, normalized.to_lowercase());
            match chosen.get_mut(&key) {
                Some(existing) => {
                    if *existing == key.1 {
                        *existing = normalized;
                    }
                }
                None => {
                    order.push(key.clone());
                    chosen.insert(key, normalized);
                }
            }
        }
        order
            .into_iter()
            .filter_map(|key| {
                let value = chosen.remove(&key)?;
                Some(TypedValue {
                    value_type: Some(key.0),
                    value,
                })
            })
            .collect()
    }
}

/// Typed external relation between works (RELS-EXT predicates).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationType {
    ContinuedIn,
    Continues,
    DiscussedIn,
    Discusses,
    HasAdaptation,
    HasAnalysis,
    HasCreatorDescription,
    HasDescriptionFromPublisher,
    HasManuscript,
    HasReview,
    HasSoundtrack,
    IsAdaptationOf,
    IsAnalysisOf,
    IsDescriptionFromPublisherOf,
    IsManuscriptOf,
    IsReviewOf,
    IsSoundtrackOfGame,
    IsSoundtrackOfMovie,
}

impl RelationType {
    pub const ALL: [RelationType; 18] = [
        RelationType::ContinuedIn,
        RelationType::Continues,
        RelationType::DiscussedIn,
        RelationType::Discusses,
        RelationType::HasAdaptation,
        RelationType::HasAnalysis,
        RelationType::HasCreatorDescription,
        RelationType::HasDescriptionFromPublisher,
        RelationType::HasManuscript,
        RelationType::HasReview,
        RelationType::HasSoundtrack,
        RelationType::IsAdaptationOf,
        RelationType::IsAnalysisOf,
        RelationType::IsDescriptionFromPublisherOf,
        RelationType::IsManuscriptOf,
        RelationType::IsReviewOf,
        RelationType::IsSoundtrackOfGame,
        RelationType::IsSoundtrackOfMovie,
    ];

    /// Name as it appears as an XML element / JSON key.
    pub fn name(self) -> &'static str {
        match self {
            RelationType::ContinuedIn => "continuedIn",
            RelationType::Continues => "continues",
            RelationType::DiscussedIn => "discussedIn",
            RelationType::Discusses => "discusses",
            RelationType::HasAdaptation => "hasAdaptation",
            RelationType::HasAnalysis => "hasAnalysis",
            RelationType::HasCreatorDescription => "hasCreatorDescription",
            RelationType::HasDescriptionFromPublisher => "hasDescriptionFromPublisher",
            RelationType::HasManuscript => "hasManuscript",
            RelationType::HasReview => "hasReview",
            RelationType::HasSoundtrack => "hasSoundtrack",
            RelationType::IsAdaptationOf => "isAdaptationOf",
            RelationType::IsAnalysisOf => "isAnalysisOf",
            RelationType::IsDescriptionFromPublisherOf => "isDescriptionFromPublisherOf",
            RelationType::IsManuscriptOf => "isManuscriptOf",
            RelationType::IsReviewOf => "isReviewOf",
            RelationType::IsSoundtrackOfGame => "isSoundtrackOfGame",
            RelationType::IsSoundtrackOfMovie => "isSoundtrackOfMovie",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Presentation projection of one manifestation, as produced by a content generator and cached.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(rename = "pid")]
    pub manifestation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_title: Option<String>,
    #[serde(default)]
    pub creators: Vec<TypedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub subjects: Vec<TypedValue>,
    #[serde(rename = "types", default)]
    pub material_types: Vec<String>,
    #[serde(default)]
    pub work_types: Vec<String>,
}

impl Content {
    /// Reduce to the fields shown per unit in a work document.
    pub fn summary(&self) -> ManifestationSummary {
        ManifestationSummary {
            manifestation_id: self.manifestation_id.clone(),
            material_types: self.material_types.clone(),
            work_types: self.work_types.clone(),
        }
    }

    /// Reduce to the fields shown for a related work.
    pub fn relation_summary(&self, relation_type: RelationType) -> RelationSummary {
        RelationSummary {
            relation_type,
            manifestation_id: self.manifestation_id.clone(),
            material_types: self.material_types.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestationSummary {
    #[serde(rename = "pid")]
    pub manifestation_id: String,
    #[serde(rename = "types")]
    pub material_types: Vec<String>,
    pub work_types: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationSummary {
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    #[serde(rename = "pid")]
    pub manifestation_id: String,
    #[serde(rename = "types")]
    pub material_types: Vec<String>,
}

/// Consolidated presentation of one work.
///
/// Maps are ordered so that serializing the same document twice yields identical bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkDocument {
    pub work_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_title: Option<String>,
    pub creators: Vec<TypedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub subjects: Vec<TypedValue>,
    pub per_unit_manifestations: BTreeMap<String, BTreeSet<ManifestationSummary>>,
    pub per_unit_relations: BTreeMap<String, BTreeMap<RelationType, Vec<usize>>>,
    pub global_relations: Vec<RelationSummary>,
}

/// A stored row: payload plus its modification time and optimistic version.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub modified: Timestamp,
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifestation_id_from_local_stream() {
        assert_eq!(
            manifestation_id("870970-basis:12345678", "localData.870970").as_deref(),
            Some("870970:12345678")
        );
        assert_eq!(manifestation_id("870970-basis:1", "commonData"), None);
        assert_eq!(manifestation_id("870970-basis:1", "localData."), None);
    }

    #[test]
    fn distinct_set_prefers_capitalized() {
        let values = [TypedValue::new("", "abc"), TypedValue::untyped("Abc")];
        assert_eq!(
            TypedValue::distinct_set(&values),
            vec![TypedValue::new(DEFAULT_TYPE, "Abc")]
        );

        let values = [TypedValue::untyped("Abc"), TypedValue::new("", "abc")];
        assert_eq!(
            TypedValue::distinct_set(&values),
            vec![TypedValue::new(DEFAULT_TYPE, "Abc")]
        );
    }

    #[test]
    fn distinct_set_labels_missing_types() {
        let values = [
            TypedValue::untyped("Magi"),
            TypedValue::new("", "Heste"),
            TypedValue::new(DEFAULT_TYPE, "heste"),
        ];
        let out = TypedValue::distinct_set(&values);
        assert_eq!(
            out,
            vec![
                TypedValue::new(DEFAULT_TYPE, "Magi"),
                TypedValue::new(DEFAULT_TYPE, "Heste"),
            ]
        );
        assert!(serde_json::to_string(&out).unwrap().contains("not specified"));
    }

    #[test]
    fn distinct_set_normalizes_and_keeps_types_apart() {
        let composed = TypedValue::new("dbc", "Caf\u{e9}");
        let decomposed = TypedValue::new("dbc", "cafe\u{301}");
        let other_type = TypedValue::new("lcsh", "cafe\u{301}");
        let out = TypedValue::distinct_set([&composed, &decomposed, &other_type]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], TypedValue::new("dbc", "Caf\u{e9}"));
        assert_eq!(out[1], TypedValue::new("lcsh", "caf\u{e9}"));
    }

    #[test]
    fn relation_type_names_round_trip() {
        for t in RelationType::ALL {
            assert_eq!(RelationType::from_name(t.name()), Some(t));
        }
        assert_eq!(
            serde_json::to_string(&RelationType::IsSoundtrackOfGame).unwrap(),
            "\"isSoundtrackOfGame\""
        );
    }
}
