mod extended;
mod manifest;
mod metadata;
mod record;

pub use self::extended::{ExtendedInfo, LanguageOverride};
pub use self::manifest::{ChunkDescriptor, Manifest, ManifestEntry};
pub use self::metadata::{ModMetadata, RESULT_OK};
pub use self::record::ModRecord;
pub(crate) use self::record::RecordDocument;


/// Timestamps are persisted as whole unix seconds.
pub(crate) mod unix {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use time::UtcDateTime;

    pub(crate) fn serialize<S: Serializer>(value: &UtcDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.unix_timestamp())
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<UtcDateTime, D::Error> {
        let seconds = i64::deserialize(deserializer)?;
        UtcDateTime::from_unix_timestamp(seconds).map_err(D::Error::custom)
    }
}
