use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{RawFile, StudyId};
use crate::error::IngestError;
use crate::source::DataSource;
use crate::store::{InstanceMetadata, Insertion, MetadataStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    /// Distinct studies touched by this call, in first-seen order.
    pub study_ids: Vec<StudyId>,
    pub parsed: usize,
    pub skipped: Vec<SkippedFile>,
    pub duplicates: usize,
    pub non_instances: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    pub name: String,
    pub reason: String,
}

/// Parses raw files into the metadata store, one instance per file.
pub struct StudyBuilder<'a> {
    store: &'a MetadataStore,
    workers: usize,
}

impl<'a> StudyBuilder<'a> {
    pub fn new(store: &'a MetadataStore) -> Self {
        Self { store, workers: 1 }
    }

    /// More than one worker parses files on a bounded thread pool.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn build(
        &self,
        files: Vec<RawFile>,
        source: &dyn DataSource,
    ) -> Result<Vec<StudyId>, IngestError> {
        Ok(self.build_report(files, source)?.study_ids)
    }

    /// Unparsable files are skipped and reported; they never abort the batch.
    pub fn build_report(
        &self,
        files: Vec<RawFile>,
        source: &dyn DataSource,
    ) -> Result<BuildReport, IngestError> {
        let decoded: Vec<(String, Result<Option<InstanceMetadata>, IngestError>)> =
            if self.workers > 1 && files.len() > 1 {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(self.workers)
                    .build()
                    .map_err(|err| IngestError::WorkerPool(err.to_string()))?;
                pool.install(|| {
                    files
                        .into_par_iter()
                        .map(|file| (file.name().to_string(), source.decode(&file)))
                        .collect()
                })
            } else {
                files
                    .into_iter()
                    .map(|file| (file.name().to_string(), source.decode(&file)))
                    .collect()
            };

        let mut report = BuildReport::default();
        for (name, result) in decoded {
            match result {
                Ok(Some(meta)) => {
                    let study_id = meta.study_id.clone();
                    if self.store.add_instance(meta) == Insertion::Duplicate {
                        report.duplicates += 1;
                    }
                    report.parsed += 1;
                    if !report.study_ids.contains(&study_id) {
                        report.study_ids.push(study_id);
                    }
                }
                Ok(None) => {
                    debug!(file = %name, "file carries no instance");
                    report.non_instances += 1;
                }
                Err(err) => {
                    warn!(file = %name, error = %err, "skipping unparsable file");
                    report.skipped.push(SkippedFile {
                        name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        debug!(
            source = source.name(),
            studies = report.study_ids.len(),
            parsed = report.parsed,
            skipped = report.skipped.len(),
            duplicates = report.duplicates,
            "studies built"
        );
        Ok(report)
    }
}
