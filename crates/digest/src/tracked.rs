use crate::Digest;
use crate::error::Result;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Digest of a tracked content file.
///
/// The persisted form is either a 40 character hex digest or the literal
/// sentinel `"0"`, which records that the file was intentionally absent (or
/// empty) when the artifact was downloaded. `Absent` is a known state, not an
/// unverified one: verification skips the file entirely rather than opening
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedDigest {
    Absent,
    Present(Digest),
}

impl TrackedDigest {
    /// The on-disk representation of [`TrackedDigest::Absent`].
    pub const SENTINEL: &'static str = "0";

    pub fn digest(&self) -> Option<&Digest> {
        match self {
            Self::Absent => None,
            Self::Present(digest) => Some(digest),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl From<Digest> for TrackedDigest {
    fn from(digest: Digest) -> Self {
        Self::Present(digest)
    }
}

impl From<Option<Digest>> for TrackedDigest {
    fn from(digest: Option<Digest>) -> Self {
        digest.map_or(Self::Absent, Self::Present)
    }
}

impl FromStr for TrackedDigest {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            Self::SENTINEL => Ok(Self::Absent),
            other => Ok(Self::Present(other.parse()?)),
        }
    }
}

impl fmt::Display for TrackedDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str(Self::SENTINEL),
            Self::Present(digest) => fmt::Display::fmt(digest, f),
        }
    }
}

impl Serialize for TrackedDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TrackedDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TrackedVisitor;
        impl Visitor<'_> for TrackedVisitor {
            type Value = TrackedDigest;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 40 character hex-encoded SHA-1 digest or \"0\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<TrackedDigest, E> {
                v.parse().map_err(|e: crate::error::Error| E::custom(&*e))
            }
        }
        deserializer.deserialize_str(TrackedVisitor)
    }
}
