use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;

use crate::domain::{InstanceId, Modality, SeriesId, StudyId};
use crate::error::IngestError;

/// Instance-level metadata produced by a data source for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceMetadata {
    pub study_id: StudyId,
    pub series_id: SeriesId,
    pub instance_id: InstanceId,
    pub modality: Option<Modality>,
    /// Series-level modality, when the source distinguishes it from the instance's.
    pub series_modality: Option<Modality>,
    pub study_date: Option<NaiveDate>,
    pub study_description: Option<String>,
    pub patient_name: Option<String>,
    pub series_number: Option<i64>,
    pub instance_number: Option<i64>,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub modality: Option<Modality>,
    pub instance_number: Option<i64>,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub series_id: SeriesId,
    pub modality: Option<Modality>,
    pub series_number: Option<i64>,
    pub instances: Vec<Instance>,
}

impl Series {
    pub fn first_instance(&self) -> Option<&Instance> {
        self.instances.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Study {
    pub study_id: StudyId,
    pub study_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub patient_name: Option<String>,
    pub series: Vec<Series>,
}

impl Study {
    pub fn new(study_id: StudyId) -> Self {
        Self {
            study_id,
            study_date: None,
            description: None,
            patient_name: None,
            series: Vec::new(),
        }
    }

    pub fn series(&self, id: &SeriesId) -> Option<&Series> {
        self.series.iter().find(|series| &series.series_id == id)
    }

    pub fn instance_count(&self) -> usize {
        self.series.iter().map(|series| series.instances.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Added,
    Duplicate,
}

/// Session-scoped index of studies shared by the builder and the router.
///
/// Inserts for one study hold that study's shard lock for the whole update,
/// so concurrent inserts never lose instances.
#[derive(Debug, Default)]
pub struct MetadataStore {
    studies: DashMap<StudyId, Study>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one instance under its study and series. Re-adding an instance
    /// that is already present in the series is a no-op.
    pub fn add_instance(&self, meta: InstanceMetadata) -> Insertion {
        let mut study = self
            .studies
            .entry(meta.study_id.clone())
            .or_insert_with(|| Study::new(meta.study_id.clone()));

        if study.study_date.is_none() {
            study.study_date = meta.study_date;
        }
        if study.description.is_none() {
            study.description = meta.study_description;
        }
        if study.patient_name.is_none() {
            study.patient_name = meta.patient_name;
        }

        let position = study
            .series
            .iter()
            .position(|series| series.series_id == meta.series_id);
        let series = match position {
            Some(index) => &mut study.series[index],
            None => {
                study.series.push(Series {
                    series_id: meta.series_id,
                    modality: meta.series_modality.or_else(|| meta.modality.clone()),
                    series_number: meta.series_number,
                    instances: Vec::new(),
                });
                let last = study.series.len() - 1;
                &mut study.series[last]
            }
        };

        if series
            .instances
            .iter()
            .any(|instance| instance.instance_id == meta.instance_id)
        {
            return Insertion::Duplicate;
        }
        series.instances.push(Instance {
            instance_id: meta.instance_id,
            modality: meta.modality,
            instance_number: meta.instance_number,
            file_name: meta.file_name,
        });
        Insertion::Added
    }

    pub fn get_study(&self, id: &StudyId) -> Option<Study> {
        self.studies.get(id).map(|study| study.clone())
    }

    pub fn study(&self, id: &StudyId) -> Result<Study, IngestError> {
        self.get_study(id)
            .ok_or_else(|| IngestError::Lookup(id.to_string()))
    }

    pub fn contains(&self, id: &StudyId) -> bool {
        self.studies.contains_key(id)
    }

    pub fn study_ids(&self) -> Vec<StudyId> {
        let mut ids: Vec<StudyId> = self.studies.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.studies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.studies.is_empty()
    }

    pub fn clear(&self) {
        self.studies.clear();
    }
}
