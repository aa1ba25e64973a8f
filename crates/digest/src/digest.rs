use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use sha1::{Digest as _, Sha1};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// A SHA-1 digest: 20 raw bytes, rendered as 40 lowercase hex characters.
///
/// Parsing accepts either case but insists on exactly 40 characters, so a
/// truncated or padded digest string can never compare equal to a real one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; Digest::LEN]);

impl Digest {
    /// Length of the raw digest in bytes.
    pub const LEN: usize = 20;
    /// Length of the hex-encoded digest in characters.
    pub const HEX_LEN: usize = Self::LEN * 2;

    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Hash an in-memory buffer.
    pub fn of(data: impl AsRef<[u8]>) -> Self {
        Self(Sha1::digest(data.as_ref()).into())
    }

    /// Hash everything a blocking reader yields until EOF.
    ///
    /// Intended to be called from inside
    /// [`spawn_blocking`](https://docs.rs/tokio/latest/tokio/task/fn.spawn_blocking.html)
    /// with a reader handed out by a storage backend.
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut hasher = Sha1::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => exn::bail!(ErrorKind::Io(e)),
            };
            hasher.update(&buffer[..read]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    /// Returns `true` if the reader's content hashes to this digest.
    pub fn matches_reader(&self, reader: impl Read) -> Result<bool> {
        Ok(Self::from_reader(reader)? == *self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Compare a hex-encoded digest against the hash of `data`.
///
/// A malformed `expected` string never matches anything.
pub fn matches_hex(expected: &str, data: impl AsRef<[u8]>) -> bool {
    expected.parse::<Digest>().is_ok_and(|digest| digest == Digest::of(data))
}

impl FromStr for Digest {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != Self::HEX_LEN {
            exn::bail!(ErrorKind::InvalidLength(s.len()));
        }
        let mut bytes = [0u8; Self::LEN];
        hex::decode_to_slice(s, &mut bytes).or_raise(|| ErrorKind::InvalidHex)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct HexVisitor;
        impl Visitor<'_> for HexVisitor {
            type Value = Digest;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 40 character hex-encoded SHA-1 digest")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Digest, E> {
                v.parse().map_err(|e: crate::error::Error| E::custom(&*e))
            }
        }
        deserializer.deserialize_str(HexVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // echo -n "hello world" | sha1sum
    const HELLO_WORLD: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

    #[test]
    fn test_hash_known_value() {
        assert_eq!(Digest::of(b"hello world").to_hex(), HELLO_WORLD);
    }

    #[test]
    fn test_reader_matches_buffer() {
        // Larger than the internal buffer so the loop runs more than once.
        let data = vec![0xA5u8; HASH_BUFFER_SIZE * 2 + 17];
        let from_reader = Digest::from_reader(std::io::Cursor::new(&data)).unwrap();
        assert_eq!(from_reader, Digest::of(&data));
        assert!(from_reader.matches_reader(std::io::Cursor::new(&data)).unwrap());
        assert!(!from_reader.matches_reader(std::io::Cursor::new(b"other")).unwrap());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let lower: Digest = HELLO_WORLD.parse().unwrap();
        let upper: Digest = HELLO_WORLD.to_uppercase().parse().unwrap();
        assert_eq!(lower, upper);
        assert_eq!(upper.to_string(), HELLO_WORLD);
    }

    #[rstest]
    #[case::empty("", 0)]
    #[case::short("2aae6c35c94fcfb415dbe95f408b9ce91ee846e", 39)]
    #[case::long("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed0", 41)]
    #[case::sentinel("0", 1)]
    fn test_wrong_length_rejected(#[case] input: &str, #[case] len: usize) {
        let err = input.parse::<Digest>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidLength(n) if *n == len));
    }

    #[test]
    fn test_non_hex_rejected() {
        let err = "zzae6c35c94fcfb415dbe95f408b9ce91ee846ed".parse::<Digest>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidHex));
    }

    #[test]
    fn test_matches_hex() {
        assert!(matches_hex(HELLO_WORLD, b"hello world"));
        assert!(!matches_hex(HELLO_WORLD, b"hello world!"));
        assert!(!matches_hex("not a digest", b"hello world"));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let digest = Digest::of(b"hello world");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{HELLO_WORLD}\""));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
        assert!(serde_json::from_str::<Digest>("\"abc\"").is_err());
    }
}
