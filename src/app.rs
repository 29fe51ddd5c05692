use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{info, warn};

use crate::archive;
use crate::builder::{BuildReport, StudyBuilder};
use crate::config::ResolvedConfig;
use crate::domain::{Locator, LocatorKind, MediaType, RawFile};
use crate::error::IngestError;
use crate::fetch::{CancelToken, ResourceFetcher};
use crate::fs_util;
use crate::router::{Router, RoutingDecision};
use crate::source::DataSourceRegistry;
use crate::store::MetadataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Running,
    Finished,
    Failed,
}

impl IngestState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, IngestState::Running)
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
    pub state: IngestState,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub decision: RoutingDecision,
    pub path: String,
    pub build: BuildReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Routed(IngestReport),
    /// The locator's extension selects no pipeline; nothing was fetched.
    Ignored {
        locator: String,
        extension: Option<String>,
    },
}

/// Runs fetch, extraction, study building and routing for one request.
pub struct App<F: ResourceFetcher> {
    fetcher: F,
    sources: DataSourceRegistry,
    config: ResolvedConfig,
}

impl<F: ResourceFetcher> App<F> {
    pub fn new(fetcher: F, sources: DataSourceRegistry, config: ResolvedConfig) -> Self {
        Self {
            fetcher,
            sources,
            config,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Remote entry point. Exactly one terminal event reaches `sink`.
    pub fn ingest_locator(
        &self,
        locator: &Locator,
        store: &MetadataStore,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<IngestOutcome, IngestError> {
        let start = Instant::now();
        let result = self
            .retrieve(locator, cancel, sink)
            .and_then(|files| match files {
                Some(files) => self.build_and_route(files, store, sink).map(IngestOutcome::Routed),
                None => Ok(IngestOutcome::Ignored {
                    locator: locator.to_string(),
                    extension: locator.extension().map(str::to_string),
                }),
            });
        finish(result, start, sink)
    }

    /// Local entry point for files the caller already holds.
    pub fn ingest_files(
        &self,
        files: Vec<RawFile>,
        store: &MetadataStore,
        sink: &dyn ProgressSink,
    ) -> Result<IngestOutcome, IngestError> {
        let start = Instant::now();
        let result = self
            .build_and_route(files, store, sink)
            .map(IngestOutcome::Routed);
        finish(result, start, sink)
    }

    /// Local entry point for files and directories on disk.
    pub fn ingest_selection(
        &self,
        paths: &[Utf8PathBuf],
        store: &MetadataStore,
        sink: &dyn ProgressSink,
    ) -> Result<IngestOutcome, IngestError> {
        let start = Instant::now();
        running(sink, format!("phase=Read; {} local paths", paths.len()));
        let result = fs_util::read_selection(paths)
            .and_then(|files| self.build_and_route(files, store, sink))
            .map(IngestOutcome::Routed);
        finish(result, start, sink)
    }

    /// `Ok(None)` when the locator's extension selects no pipeline.
    pub fn retrieve(
        &self,
        locator: &Locator,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<Option<Vec<RawFile>>, IngestError> {
        let kind = locator.kind();
        if kind == LocatorKind::Unrecognized {
            info!(locator = %locator, "no pipeline for locator extension");
            return Ok(None);
        }

        running(sink, format!("phase=Fetch; {locator}"));
        let start = Instant::now();
        let resource = self.fetcher.fetch(locator, cancel)?;
        sink.event(ProgressEvent {
            message: format!("fetch.response bytes={}", resource.bytes.len()),
            elapsed: Some(start.elapsed()),
            state: IngestState::Running,
        });

        let files = match kind {
            LocatorKind::Archive => {
                running(sink, "phase=Extract; decompressing archive".to_string());
                archive::extract(&resource.bytes)?
            }
            LocatorKind::SingleFile => {
                let media_type = resource
                    .content_type
                    .map(MediaType::declared)
                    .unwrap_or_default();
                vec![RawFile::new(locator.file_name(), media_type, resource.bytes)]
            }
            LocatorKind::Unrecognized => return Ok(None),
        };
        Ok(Some(files))
    }

    fn build_and_route(
        &self,
        files: Vec<RawFile>,
        store: &MetadataStore,
        sink: &dyn ProgressSink,
    ) -> Result<IngestReport, IngestError> {
        let source = self.sources.first(&self.config.data_source)?;

        running(sink, format!("phase=Build; {} files", files.len()));
        let build = StudyBuilder::new(store)
            .with_workers(self.config.workers)
            .build_report(files, source.as_ref())?;
        if !build.skipped.is_empty() {
            warn!(skipped = build.skipped.len(), "some files were not parsed");
        }

        running(sink, format!("phase=Route; {} studies", build.study_ids.len()));
        let decision = Router::new(store, &self.config.policy).route(
            &build.study_ids,
            &self.config.default_mode,
            self.config.extension_available(),
        );
        let path = decision.to_path();
        info!(path = %path, "ingestion routed");

        Ok(IngestReport {
            decision,
            path,
            build,
        })
    }
}

fn running(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
        state: IngestState::Running,
    });
}

fn finish(
    result: Result<IngestOutcome, IngestError>,
    start: Instant,
    sink: &dyn ProgressSink,
) -> Result<IngestOutcome, IngestError> {
    let (message, state) = match &result {
        Ok(IngestOutcome::Routed(report)) => (format!("done; {}", report.path), IngestState::Finished),
        Ok(IngestOutcome::Ignored { locator, .. }) => {
            (format!("ignored; {locator}"), IngestState::Finished)
        }
        Err(err) => (format!("failed; {err}"), IngestState::Failed),
    };
    sink.event(ProgressEvent {
        message,
        elapsed: Some(start.elapsed()),
        state,
    });
    result
}
