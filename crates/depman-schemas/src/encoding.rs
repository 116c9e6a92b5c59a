//! Byte-level encodings used as keys in the persistent source cache.
//!
//! The cache stores everything as opaque bytes in ordered buckets, so the
//! sort order of a key matters: version list entries need to sort the way a
//! human would expect (by kind, then value), and freshness timestamps need
//! to sort chronologically so a range scan can find "anything written since
//! epoch X" without decoding every entry.

use jiff::Timestamp;

/// Tag byte distinguishing the three kinds of unpaired version a source can
/// report, ordered the way the solver prefers to consider them: a plain
/// (non-semver) tag is the least specific, then a branch, then a semver tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum VersionKindTag {
    Plain = 0,
    Branch = 1,
    Semver = 2,
}

/// Encode an unpaired version's kind and textual form into a sortable cache
/// key: a single tag byte followed by the UTF-8 form of the version.
pub fn encode_version_key(kind: VersionKindTag, text: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(text.len() + 1);
    key.push(kind as u8);
    key.extend_from_slice(text.as_bytes());
    key
}

/// Decode a key produced by [`encode_version_key`].
pub fn decode_version_key(key: &[u8]) -> Option<(VersionKindTag, &str)> {
    let (&tag, rest) = key.split_first()?;
    let kind = match tag {
        0 => VersionKindTag::Plain,
        1 => VersionKindTag::Branch,
        2 => VersionKindTag::Semver,
        _ => return None,
    };
    std::str::from_utf8(rest).ok().map(|s| (kind, s))
}

/// Encode a Unix-epoch timestamp as a fixed-width, big-endian byte string so
/// that byte-lexicographic order matches chronological order. Used as the
/// bucket key for cache freshness: a read is a miss if its epoch key sorts
/// below the watermark the gateway was last refreshed at.
pub fn encode_epoch_key(ts: Timestamp) -> [u8; 8] {
    let secs = ts.as_second();
    let unsigned = (secs as i64 as u64) ^ (1u64 << 63);
    unsigned.to_be_bytes()
}

/// Inverse of [`encode_epoch_key`].
pub fn decode_epoch_key(key: [u8; 8]) -> Timestamp {
    let unsigned = u64::from_be_bytes(key);
    let secs = (unsigned ^ (1u64 << 63)) as i64;
    Timestamp::from_second(secs).expect("encoded epoch key is always in range")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_keys_sort_by_kind_then_text() {
        let plain = encode_version_key(VersionKindTag::Plain, "release-1");
        let branch = encode_version_key(VersionKindTag::Branch, "main");
        let semver = encode_version_key(VersionKindTag::Semver, "v1.0.0");
        assert!(plain < branch);
        assert!(branch < semver);
    }

    #[test]
    fn version_key_round_trips() {
        let key = encode_version_key(VersionKindTag::Semver, "v2.3.4");
        let (kind, text) = decode_version_key(&key).unwrap();
        assert_eq!(kind, VersionKindTag::Semver);
        assert_eq!(text, "v2.3.4");
    }

    #[test]
    fn epoch_keys_sort_chronologically() {
        let earlier = Timestamp::from_second(1_700_000_000).unwrap();
        let later = Timestamp::from_second(1_800_000_000).unwrap();
        assert!(encode_epoch_key(earlier) < encode_epoch_key(later));
    }

    #[test]
    fn epoch_key_round_trips() {
        let ts = Timestamp::from_second(1_753_000_000).unwrap();
        assert_eq!(decode_epoch_key(encode_epoch_key(ts)), ts);
    }
}
