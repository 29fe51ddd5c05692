use std::io::{Cursor, Write};
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::json;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use studylink::app::{App, IngestOutcome, IngestState, ProgressEvent, ProgressSink};
use studylink::config::ResolvedConfig;
use studylink::domain::{Locator, LocatorKind};
use studylink::error::IngestError;
use studylink::fetch::{CancelToken, FetchedResource, ResourceFetcher};
use studylink::source::DataSourceRegistry;
use studylink::store::MetadataStore;

#[derive(Default)]
struct RecordingSink {
    states: Mutex<Vec<IngestState>>,
}

impl RecordingSink {
    fn terminal(&self) -> Vec<IngestState> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|state| state.is_terminal())
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.states.lock().unwrap().push(event.state);
    }
}

struct MockFetcher {
    response: Result<Vec<u8>, u16>,
}

impl MockFetcher {
    fn ok(bytes: Vec<u8>) -> Self {
        Self {
            response: Ok(bytes),
        }
    }

    fn status(status: u16) -> Self {
        Self {
            response: Err(status),
        }
    }
}

impl ResourceFetcher for MockFetcher {
    fn fetch(
        &self,
        locator: &Locator,
        cancel: &CancelToken,
    ) -> Result<FetchedResource, IngestError> {
        assert_ne!(locator.kind(), LocatorKind::Unrecognized);
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        match &self.response {
            Ok(bytes) => Ok(FetchedResource {
                bytes: bytes.clone(),
                content_type: Some("application/octet-stream".to_string()),
            }),
            Err(status) => Err(IngestError::RetrievalStatus {
                status: *status,
                message: "denied".to_string(),
            }),
        }
    }
}

fn instance_bytes(study: &str, series: &str, sop: &str, modality: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "0020000D": {"vr": "UI", "Value": [study]},
        "0020000E": {"vr": "UI", "Value": [series]},
        "00080018": {"vr": "UI", "Value": [sop]},
        "00080060": {"vr": "CS", "Value": [modality]}
    }))
    .unwrap()
}

fn zip_of(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    writer.add_directory("root/", options).unwrap();
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn app(fetcher: MockFetcher) -> App<MockFetcher> {
    App::new(
        fetcher,
        DataSourceRegistry::with_defaults(),
        ResolvedConfig::default(),
    )
}

#[test]
fn single_file_link_routes_to_default_mode() {
    let app = app(MockFetcher::ok(instance_bytes("1.2.3", "1.2.3.1", "1.2.3.1.1", "CT")));
    let store = MetadataStore::new();
    let sink = RecordingSink::default();
    let locator: Locator = "https://x/y/file.dcm".parse().unwrap();

    let outcome = app
        .ingest_locator(&locator, &store, &CancelToken::new(), &sink)
        .unwrap();

    let IngestOutcome::Routed(report) = outcome else {
        panic!("expected routed outcome");
    };
    assert_eq!(report.decision.mode, "viewer");
    assert_eq!(
        report.path,
        "/viewer?StudyInstanceUIDs=1.2.3&datasources=dicomlocal"
    );
    let study = store.study(&"1.2.3".parse().unwrap()).unwrap();
    assert_eq!(study.series[0].instances[0].file_name, "file.dcm");
    assert_eq!(sink.terminal(), vec![IngestState::Finished]);
}

#[test]
fn archive_link_with_microscopy_switches_mode() {
    let bytes = zip_of(&[
        ("root/a.dcm", instance_bytes("1.1", "1.1.1", "1.1.1.1", "CT")),
        ("root/b.dcm", instance_bytes("2.2", "2.2.1", "2.2.1.1", "SM")),
        ("root/DICOMDIR", b"index".to_vec()),
    ]);
    let app = app(MockFetcher::ok(bytes));
    let store = MetadataStore::new();
    let locator: Locator = "https://x/y/bundle.zip".parse().unwrap();

    let outcome = app
        .ingest_locator(&locator, &store, &CancelToken::new(), &RecordingSink::default())
        .unwrap();

    let IngestOutcome::Routed(report) = outcome else {
        panic!("expected routed outcome");
    };
    assert_eq!(report.decision.mode, "microscopy");
    assert_eq!(report.decision.study_instance_uids(), vec!["2.2", "1.1"]);
    assert_eq!(report.build.non_instances, 1);
    assert!(report.build.skipped.is_empty());
}

#[test]
fn unrecognized_extension_fetches_nothing() {
    let fetcher = MockFetcher::ok(Vec::new());
    let app = app(fetcher);
    let store = MetadataStore::new();
    let sink = RecordingSink::default();
    let locator: Locator = "https://x/y/volume.nii".parse().unwrap();

    let outcome = app
        .ingest_locator(&locator, &store, &CancelToken::new(), &sink)
        .unwrap();

    assert_matches!(
        outcome,
        IngestOutcome::Ignored { extension: Some(ref ext), .. } if ext == "nii"
    );
    assert!(store.is_empty());
    assert_eq!(sink.terminal(), vec![IngestState::Finished]);
}

#[test]
fn retrieval_failure_emits_failed_state() {
    let app = app(MockFetcher::status(403));
    let store = MetadataStore::new();
    let sink = RecordingSink::default();
    let locator: Locator = "https://x/y/bundle.zip".parse().unwrap();

    let err = app
        .ingest_locator(&locator, &store, &CancelToken::new(), &sink)
        .unwrap_err();

    assert_matches!(err, IngestError::RetrievalStatus { status: 403, .. });
    assert!(err.is_retrieval());
    assert_eq!(sink.terminal(), vec![IngestState::Failed]);
    assert!(store.is_empty());
}

#[test]
fn corrupt_archive_aborts_before_building() {
    let app = app(MockFetcher::ok(b"not a zip".to_vec()));
    let store = MetadataStore::new();
    let sink = RecordingSink::default();
    let locator: Locator = "https://x/y/bundle.zip".parse().unwrap();

    let err = app
        .ingest_locator(&locator, &store, &CancelToken::new(), &sink)
        .unwrap_err();

    assert_matches!(err, IngestError::Extraction(_));
    assert_eq!(sink.terminal(), vec![IngestState::Failed]);
    assert!(store.is_empty());
}

#[test]
fn extension_unavailable_keeps_default_mode() {
    let bytes = zip_of(&[("root/b.dcm", instance_bytes("2.2", "2.2.1", "2.2.1.1", "SM"))]);
    let mut config = ResolvedConfig::default();
    config.extensions.clear();
    let app = App::new(
        MockFetcher::ok(bytes),
        DataSourceRegistry::with_defaults(),
        config,
    );
    let store = MetadataStore::new();
    let locator: Locator = "https://x/y/bundle.zip".parse().unwrap();

    let outcome = app
        .ingest_locator(&locator, &store, &CancelToken::new(), &RecordingSink::default())
        .unwrap();

    let IngestOutcome::Routed(report) = outcome else {
        panic!("expected routed outcome");
    };
    assert_eq!(report.decision.mode, "viewer");
}

#[test]
fn missing_data_source_fails() {
    let app = App::new(
        MockFetcher::ok(Vec::new()),
        DataSourceRegistry::new(),
        ResolvedConfig::default(),
    );
    let store = MetadataStore::new();
    let sink = RecordingSink::default();

    let err = app.ingest_files(Vec::new(), &store, &sink).unwrap_err();

    assert_matches!(err, IngestError::MissingDataSource(_));
    assert_eq!(sink.terminal(), vec![IngestState::Failed]);
}

#[test]
fn local_selection_reads_directories_and_archives() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("drop");
    std::fs::create_dir_all(dir.join("nested")).unwrap();
    std::fs::write(
        dir.join("a.dcm"),
        instance_bytes("1.1", "1.1.1", "1.1.1.1", "CT"),
    )
    .unwrap();
    std::fs::write(
        dir.join("nested").join("b.dcm"),
        instance_bytes("1.1", "1.1.1", "1.1.1.2", "CT"),
    )
    .unwrap();
    std::fs::write(dir.join("DICOMDIR"), b"index").unwrap();
    let archive = temp.path().join("more.zip");
    std::fs::write(
        &archive,
        zip_of(&[("root/c.dcm", instance_bytes("3.3", "3.3.1", "3.3.1.1", "SM"))]),
    )
    .unwrap();

    let app = app(MockFetcher::ok(Vec::new()));
    let store = MetadataStore::new();
    let paths = vec![
        Utf8PathBuf::from_path_buf(dir).unwrap(),
        Utf8PathBuf::from_path_buf(archive).unwrap(),
    ];

    let outcome = app
        .ingest_selection(&paths, &store, &RecordingSink::default())
        .unwrap();

    let IngestOutcome::Routed(report) = outcome else {
        panic!("expected routed outcome");
    };
    assert_eq!(report.build.parsed, 3);
    assert_eq!(report.build.non_instances, 1);
    assert_eq!(store.study(&"1.1".parse().unwrap()).unwrap().instance_count(), 2);
    assert_eq!(report.decision.mode, "microscopy");
    assert_eq!(report.decision.study_instance_uids(), vec!["3.3", "1.1"]);
}

#[test]
fn cancelled_fetch_is_a_failure() {
    let app = app(MockFetcher::ok(Vec::new()));
    let store = MetadataStore::new();
    let sink = RecordingSink::default();
    let cancel = CancelToken::new();
    cancel.cancel();
    let locator: Locator = "https://x/y/file.dcm".parse().unwrap();

    let err = app.ingest_locator(&locator, &store, &cancel, &sink).unwrap_err();

    assert_matches!(err, IngestError::Cancelled);
    assert_eq!(sink.terminal(), vec![IngestState::Failed]);
}

#[cfg(unix)]
#[test]
fn symlinked_directory_cycle_is_not_followed() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("drop");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("a.dcm"),
        instance_bytes("1.1", "1.1.1", "1.1.1.1", "CT"),
    )
    .unwrap();
    std::os::unix::fs::symlink(&dir, dir.join("loop")).unwrap();

    let app = app(MockFetcher::ok(Vec::new()));
    let store = MetadataStore::new();
    let paths = vec![Utf8PathBuf::from_path_buf(dir).unwrap()];

    let outcome = app
        .ingest_selection(&paths, &store, &RecordingSink::default())
        .unwrap();

    let IngestOutcome::Routed(report) = outcome else {
        panic!("expected routed outcome");
    };
    assert_eq!(report.build.parsed, 1);
    assert_eq!(store.len(), 1);
}
