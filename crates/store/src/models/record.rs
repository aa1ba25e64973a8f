use crate::error::{Error, ErrorKind};
use crate::models::{ExtendedInfo, ModMetadata};
use exn::{OptionExt, ResultExt};
use modvault_digest::{Digest, TrackedDigest};
use modvault_script::ScriptMetadata;
use serde::{Deserialize, Serialize};
use time::UtcDateTime;

/// Everything modvault knows about one locally stored artifact.
///
/// A `ModRecord` handed out by the [`Repository`](crate::Repository) has
/// always passed verification; one built by hand (e.g. by the download
/// pipeline) hasn't until it is saved and checked again.
#[derive(Debug, Clone, PartialEq)]
pub struct ModRecord {
    pub id: u64,
    pub metadata: ModMetadata,
    /// Digest of the persisted manifest blob. Present exactly when the
    /// artifact is UGC.
    pub manifest_digest: Option<Digest>,
    pub info_digest: TrackedDigest,
    pub main_digest: TrackedDigest,
    /// Remote update time at download.
    pub updated_time: UtcDateTime,
    pub extended: ExtendedInfo,
    pub script: Option<ScriptMetadata>,
}

impl ModRecord {
    pub fn is_ugc(&self) -> bool {
        self.manifest_digest.is_some()
    }
}

/// On-disk shape of a record.
///
/// Every field a hand-edited or truncated file might lack is optional here,
/// so that "missing" can be told apart from "malformed" when converting into
/// a [`ModRecord`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecordDocument {
    id: u64,
    #[serde(default)]
    metadata: Option<ModMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    manifest_digest: Option<Digest>,
    #[serde(default)]
    info_digest: Option<TrackedDigest>,
    #[serde(default)]
    main_digest: Option<TrackedDigest>,
    updated_time: i64,
    #[serde(default)]
    extended: ExtendedInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    script_metadata: Option<ScriptMetadata>,
}

impl From<&ModRecord> for RecordDocument {
    fn from(record: &ModRecord) -> Self {
        Self {
            id: record.id,
            metadata: Some(record.metadata.clone()),
            manifest_digest: record.manifest_digest,
            info_digest: Some(record.info_digest),
            main_digest: Some(record.main_digest),
            updated_time: record.updated_time.unix_timestamp(),
            extended: record.extended.clone(),
            script_metadata: record.script.clone(),
        }
    }
}

impl TryFrom<RecordDocument> for ModRecord {
    type Error = Error;
    fn try_from(doc: RecordDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: doc.id,
            metadata: doc.metadata.ok_or_raise(|| ErrorKind::InvalidData("metadata"))?,
            manifest_digest: doc.manifest_digest,
            info_digest: doc.info_digest.ok_or_raise(|| ErrorKind::InvalidData("info digest"))?,
            main_digest: doc.main_digest.ok_or_raise(|| ErrorKind::InvalidData("main digest"))?,
            updated_time: UtcDateTime::from_unix_timestamp(doc.updated_time)
                .or_raise(|| ErrorKind::InvalidData("updated time"))?,
            extended: doc.extended,
            script: doc.script_metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::metadata;

    fn record() -> ModRecord {
        ModRecord {
            id: 7,
            metadata: metadata(7),
            manifest_digest: Some(Digest::of(b"manifest")),
            info_digest: Digest::of(b"info").into(),
            main_digest: TrackedDigest::Absent,
            updated_time: metadata(7).updated,
            extended: ExtendedInfo::default(),
            script: None,
        }
    }

    #[test]
    fn test_model_to_document() {
        let json = serde_json::to_value(RecordDocument::from(&record())).unwrap();
        assert_eq!(json["mainDigest"], "0");
        assert_eq!(json["updatedTime"], 1_700_000_000);
        assert_eq!(json["manifestDigest"], Digest::of(b"manifest").to_hex());
        assert!(json.get("scriptMetadata").is_none());
    }

    #[test]
    fn test_document_to_model() {
        let json = serde_json::to_string(&RecordDocument::from(&record())).unwrap();
        let doc: RecordDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(ModRecord::try_from(doc).unwrap(), record());
    }

    #[test]
    fn test_non_ugc_omits_manifest_digest() {
        let mut record = record();
        record.manifest_digest = None;
        let json = serde_json::to_value(RecordDocument::from(&record)).unwrap();
        assert!(json.get("manifestDigest").is_none());
        assert!(!record.is_ugc());
    }

    #[test]
    fn test_missing_digest_is_invalid() {
        let mut json = serde_json::to_value(RecordDocument::from(&record())).unwrap();
        json.as_object_mut().unwrap().remove("infoDigest");
        let doc: RecordDocument = serde_json::from_value(json).unwrap();
        let err = ModRecord::try_from(doc).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("info digest")));
    }

    #[test]
    fn test_missing_metadata_is_invalid() {
        let mut json = serde_json::to_value(RecordDocument::from(&record())).unwrap();
        json["metadata"] = serde_json::Value::Null;
        let doc: RecordDocument = serde_json::from_value(json).unwrap();
        assert!(ModRecord::try_from(doc).is_err());
    }

    #[test]
    fn test_wrong_length_digest_fails_to_parse() {
        let mut json = serde_json::to_value(RecordDocument::from(&record())).unwrap();
        json["infoDigest"] = "abc123".into();
        assert!(serde_json::from_value::<RecordDocument>(json).is_err());
    }
}
