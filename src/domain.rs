use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// File name of the DICOM media directory index.
pub const DICOMDIR: &str = "DICOMDIR";

static UID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)*$").unwrap());

const UID_MAX_LEN: usize = 64;

fn validate_uid(value: &str) -> Result<String, IngestError> {
    let normalized = value.trim().trim_end_matches('\0');
    if normalized.is_empty() || normalized.len() > UID_MAX_LEN || !UID_RE.is_match(normalized) {
        return Err(IngestError::InvalidUid(value.to_string()));
    }
    Ok(normalized.to_string())
}

macro_rules! uid_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IngestError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                validate_uid(value).map(Self)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IngestError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

uid_type!(
    /// StudyInstanceUID (0020,000D).
    StudyId
);
uid_type!(
    /// SeriesInstanceUID (0020,000E).
    SeriesId
);
uid_type!(
    /// SOPInstanceUID (0008,0018).
    InstanceId
);

/// Acquisition modality code, e.g. `CT`, `MR` or `SM` (slide microscopy).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modality(String);

impl Modality {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq<str> for Modality {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Declared media type of a raw file. Empty means "unspecified".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MediaType(String);

impl MediaType {
    pub const DICOM: &'static str = "application/dicom";

    pub fn dicom() -> Self {
        Self(Self::DICOM.to_string())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn declared(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_dicom(&self) -> bool {
        self.0 == Self::DICOM
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named, typed byte payload handed to the study builder exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    name: String,
    media_type: MediaType,
    bytes: Vec<u8>,
}

impl RawFile {
    pub fn new(name: impl Into<String>, media_type: MediaType, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type,
            bytes,
        }
    }

    /// `DICOMDIR` gets an empty media type, anything else is typed as DICOM.
    pub fn from_entry(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let media_type = if is_dicomdir(&name) {
            MediaType::empty()
        } else {
            MediaType::dicom()
        };
        Self::new(name, media_type, bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Matches on the final path segment, so `sub/DICOMDIR` is an index file too.
pub fn is_dicomdir(name: &str) -> bool {
    name.rsplit('/').next() == Some(DICOMDIR)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKind {
    Archive,
    SingleFile,
    Unrecognized,
}

/// Reference to a remote resource. Its trailing extension selects the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Locator(String);

impl Locator {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Text after the last `.` of the whole locator, if any.
    pub fn extension(&self) -> Option<&str> {
        self.0.rsplit_once('.').map(|(_, ext)| ext)
    }

    pub fn kind(&self) -> LocatorKind {
        match self.extension() {
            Some("zip") => LocatorKind::Archive,
            Some("dcm") => LocatorKind::SingleFile,
            _ => LocatorKind::Unrecognized,
        }
    }

    /// Last `/`-segment of the locator path, without query or fragment.
    pub fn file_name(&self) -> &str {
        let path = self
            .0
            .split(['?', '#'])
            .next()
            .unwrap_or(self.0.as_str());
        path.rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(path)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Locator {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IngestError::InvalidLocator(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}
