use std::time::Duration;

use assert_matches::assert_matches;

use studylink::config::{ConfigLoader, MICROSCOPY_EXTENSION};
use studylink::error::IngestError;

#[test]
fn parse_full_config() {
    let config = ConfigLoader::parse(
        r#"{
            "schema_version": 1,
            "routing": {
                "default_mode": "basic",
                "specialized_mode": "slides",
                "sentinel_modality": "WSI",
                "data_source_tag": "local",
                "duplicate_qualifying": true
            },
            "extensions": ["@ohif/extension-cornerstone"],
            "fetch": {"timeout_secs": 5},
            "build": {"workers": 4},
            "data_source": "customApi"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(config);
    assert_eq!(resolved.default_mode, "basic");
    assert_eq!(resolved.policy.specialized_mode, "slides");
    assert_eq!(resolved.policy.sentinel_modality, "WSI");
    assert_eq!(resolved.policy.data_source_tag, "local");
    assert!(resolved.policy.duplicate_qualifying);
    assert!(!resolved.extension_available());
    assert_eq!(resolved.timeout, Some(Duration::from_secs(5)));
    assert_eq!(resolved.workers, 4);
    assert_eq!(resolved.data_source, "customApi");
}

#[test]
fn explicit_empty_extension_list_disables_microscopy() {
    let config = ConfigLoader::parse(r#"{"extensions": []}"#).unwrap();
    assert!(!ConfigLoader::resolve_config(config).extension_available());

    let config = ConfigLoader::parse(&format!(r#"{{"extensions": ["{MICROSCOPY_EXTENSION}"]}}"#))
        .unwrap();
    assert!(ConfigLoader::resolve_config(config).extension_available());
}

#[test]
fn resolve_reads_explicit_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("studylink.json");
    std::fs::write(&path, r#"{"routing": {"default_mode": "tmtv"}}"#).unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.default_mode, "tmtv");
}

#[test]
fn missing_explicit_file_is_an_error() {
    let err = ConfigLoader::resolve(Some("/nonexistent/studylink.json")).unwrap_err();
    assert_matches!(err, IngestError::ConfigRead(_));
}

#[test]
fn malformed_config_is_an_error() {
    assert_matches!(
        ConfigLoader::parse("{ not json"),
        Err(IngestError::ConfigParse(_))
    );
}
