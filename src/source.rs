//! Data sources turn raw files into store-ready instance metadata.
//!
//! Sources are registered under a capability tag and looked up explicitly by
//! that tag; the first source registered for a tag wins.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::config::LOCAL_CAPABILITY;
use crate::domain::{InstanceId, Modality, RawFile, SeriesId, StudyId, is_dicomdir};
use crate::error::IngestError;
use crate::store::InstanceMetadata;

pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means the file is valid but carries no instance (an index
    /// file such as `DICOMDIR`). Errors are reported per file.
    fn decode(&self, file: &RawFile) -> Result<Option<InstanceMetadata>, IngestError>;
}

impl std::fmt::Debug for dyn DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource").field("name", &self.name()).finish()
    }
}

#[derive(Clone, Default)]
pub struct DataSourceRegistry {
    entries: Vec<(String, Arc<dyn DataSource>)>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in DICOM JSON source under the local capability.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(LOCAL_CAPABILITY, Arc::new(DicomJsonSource));
        registry
    }

    pub fn register(&mut self, capability: impl Into<String>, source: Arc<dyn DataSource>) {
        self.entries.push((capability.into(), source));
    }

    pub fn first(&self, capability: &str) -> Result<Arc<dyn DataSource>, IngestError> {
        self.entries
            .iter()
            .find(|(tag, _)| tag == capability)
            .map(|(_, source)| Arc::clone(source))
            .ok_or_else(|| IngestError::MissingDataSource(capability.to_string()))
    }

    pub fn capabilities(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = Vec::new();
        for (tag, _) in &self.entries {
            if !tags.contains(&tag.as_str()) {
                tags.push(tag.as_str());
            }
        }
        tags
    }
}

const STUDY_INSTANCE_UID: &str = "0020000D";
const SERIES_INSTANCE_UID: &str = "0020000E";
const SOP_INSTANCE_UID: &str = "00080018";
const MODALITY: &str = "00080060";
const STUDY_DATE: &str = "00080020";
const STUDY_DESCRIPTION: &str = "00081030";
const PATIENT_NAME: &str = "00100010";
const SERIES_NUMBER: &str = "00200011";
const INSTANCE_NUMBER: &str = "00200013";

/// Reads instances encoded in the DICOM JSON model (PS3.18 Annex F).
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomJsonSource;

impl DataSource for DicomJsonSource {
    fn name(&self) -> &str {
        "dicomjson"
    }

    fn decode(&self, file: &RawFile) -> Result<Option<InstanceMetadata>, IngestError> {
        if is_dicomdir(file.name()) {
            return Ok(None);
        }

        let root: Value = serde_json::from_slice(file.bytes())
            .map_err(|err| IngestError::parse(file.name(), err.to_string()))?;
        let dataset = match &root {
            Value::Object(map) => map,
            Value::Array(items) => match items.first() {
                Some(Value::Object(map)) => map,
                _ => return Err(IngestError::parse(file.name(), "expected a dataset object")),
            },
            _ => return Err(IngestError::parse(file.name(), "expected a dataset object")),
        };

        let required = |tag: &str, label: &str| {
            string_value(dataset, tag)
                .ok_or_else(|| IngestError::parse(file.name(), format!("missing {label}")))
        };
        let study_id: StudyId = required(STUDY_INSTANCE_UID, "StudyInstanceUID")?
            .parse()
            .map_err(|err: IngestError| IngestError::parse(file.name(), err.to_string()))?;
        let series_id: SeriesId = required(SERIES_INSTANCE_UID, "SeriesInstanceUID")?
            .parse()
            .map_err(|err: IngestError| IngestError::parse(file.name(), err.to_string()))?;
        let instance_id: InstanceId = required(SOP_INSTANCE_UID, "SOPInstanceUID")?
            .parse()
            .map_err(|err: IngestError| IngestError::parse(file.name(), err.to_string()))?;

        let modality = string_value(dataset, MODALITY).map(Modality::new);
        Ok(Some(InstanceMetadata {
            study_id,
            series_id,
            instance_id,
            series_modality: modality.clone(),
            modality,
            study_date: string_value(dataset, STUDY_DATE)
                .and_then(|date| NaiveDate::parse_from_str(&date, "%Y%m%d").ok()),
            study_description: string_value(dataset, STUDY_DESCRIPTION),
            patient_name: string_value(dataset, PATIENT_NAME),
            series_number: int_value(dataset, SERIES_NUMBER),
            instance_number: int_value(dataset, INSTANCE_NUMBER),
            file_name: file.name().to_string(),
        }))
    }
}

fn first_value<'a>(dataset: &'a Map<String, Value>, tag: &str) -> Option<&'a Value> {
    dataset
        .get(tag)
        .and_then(|element| element.get("Value"))
        .and_then(Value::as_array)
        .and_then(|values| values.first())
}

fn string_value(dataset: &Map<String, Value>, tag: &str) -> Option<String> {
    let value = match first_value(dataset, tag)? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        person @ Value::Object(_) => person.get("Alphabetic")?.as_str()?.trim().to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}

fn int_value(dataset: &Map<String, Value>, tag: &str) -> Option<i64> {
    match first_value(dataset, tag)? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
