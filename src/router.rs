use serde::Serialize;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::domain::StudyId;
use crate::store::{MetadataStore, Study};

pub const STUDY_UIDS_PARAM: &str = "StudyInstanceUIDs";
pub const DATA_SOURCES_PARAM: &str = "datasources";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingPolicy {
    pub specialized_mode: String,
    pub sentinel_modality: String,
    pub data_source_tag: String,
    /// Emit qualifying studies twice (once for the specialized branch and
    /// once in the all-studies pass).
    pub duplicate_qualifying: bool,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            specialized_mode: "microscopy".to_string(),
            sentinel_modality: "SM".to_string(),
            data_source_tag: "dicomlocal".to_string(),
            duplicate_qualifying: false,
        }
    }
}

/// Target mode plus an ordered, multi-valued query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub mode: String,
    pub query: Vec<(String, String)>,
}

impl RoutingDecision {
    pub fn study_instance_uids(&self) -> Vec<&str> {
        self.values(STUDY_UIDS_PARAM)
    }

    pub fn values(&self, key: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Form-urlencoded query string. Values are encoded once and never decoded.
    pub fn query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish()
    }

    /// Navigation target `/<mode>?<query>`. The mode is percent-encoded as one path segment.
    pub fn to_path(&self) -> String {
        format!("/{}?{}", encode_segment(&self.mode), self.query_string())
    }
}

pub struct Router<'a> {
    store: &'a MetadataStore,
    policy: &'a RoutingPolicy,
}

impl<'a> Router<'a> {
    pub fn new(store: &'a MetadataStore, policy: &'a RoutingPolicy) -> Self {
        Self { store, policy }
    }

    /// Decides which mode opens the given studies.
    ///
    /// When the specialized extension is available, studies with any series
    /// of the sentinel modality (series-level, or on that series' first
    /// instance) switch the mode and are listed first. Every input study is
    /// then listed, followed by the data-source tag.
    pub fn route(
        &self,
        study_ids: &[StudyId],
        default_mode: &str,
        extension_available: bool,
    ) -> RoutingDecision {
        let mut mode = default_mode.to_string();
        let mut query: Vec<(String, String)> = Vec::new();

        let qualifying: Vec<&StudyId> = if extension_available {
            study_ids
                .iter()
                .filter(|id| match self.store.get_study(id) {
                    Some(study) => is_of_interest(&study, &self.policy.sentinel_modality),
                    None => {
                        warn!(study = %id, "study missing from metadata store");
                        false
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        if !qualifying.is_empty() {
            mode = self.policy.specialized_mode.clone();
            for id in &qualifying {
                query.push((STUDY_UIDS_PARAM.to_string(), id.to_string()));
            }
        }

        for id in study_ids {
            if !self.policy.duplicate_qualifying && qualifying.contains(&id) {
                continue;
            }
            query.push((STUDY_UIDS_PARAM.to_string(), id.to_string()));
        }
        query.push((
            DATA_SOURCES_PARAM.to_string(),
            self.policy.data_source_tag.clone(),
        ));

        debug!(mode = %mode, qualifying = qualifying.len(), studies = study_ids.len(), "routed");
        RoutingDecision { mode, query }
    }
}

/// `byte_serialize` emits `+` only for a space, which a path segment would keep literally.
fn encode_segment(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Only the first instance of each series is inspected.
pub fn is_of_interest(study: &Study, sentinel: &str) -> bool {
    study.series.iter().any(|series| {
        series
            .modality
            .as_ref()
            .is_some_and(|modality| modality.as_str() == sentinel)
            || series
                .first_instance()
                .and_then(|instance| instance.modality.as_ref())
                .is_some_and(|modality| modality.as_str() == sentinel)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_encodes_special_characters_once() {
        let decision = RoutingDecision {
            mode: "viewer".to_string(),
            query: vec![
                ("StudyInstanceUIDs".to_string(), "1.2.3".to_string()),
                ("datasources".to_string(), "a&b=c%d e".to_string()),
            ],
        };
        assert_eq!(
            decision.to_path(),
            "/viewer?StudyInstanceUIDs=1.2.3&datasources=a%26b%3Dc%25d+e"
        );
    }

    #[test]
    fn mode_cannot_escape_its_path_segment() {
        let decision = RoutingDecision {
            mode: "a b/c?d#e+f".to_string(),
            query: vec![("datasources".to_string(), "dicomlocal".to_string())],
        };
        assert_eq!(
            decision.to_path(),
            "/a%20b%2Fc%3Fd%23e%2Bf?datasources=dicomlocal"
        );
    }

    #[test]
    fn plain_mode_is_unchanged() {
        let decision = RoutingDecision {
            mode: "microscopy".to_string(),
            query: Vec::new(),
        };
        assert_eq!(decision.to_path(), "/microscopy?");
    }
}
