use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;

/// Text a reply is overwritten with when its author deletes it.
pub const DELETED_MARKER: &str = "[deleted]";

/// 12-byte post identifier: 4-byte seconds timestamp, 5 process-random bytes,
/// 3-byte counter. Travels as 24 hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostId([u8; 12]);

static PROCESS_UNIQUE: Lazy<[u8; 5]> = Lazy::new(|| rand::thread_rng().gen());
static COUNTER: Lazy<AtomicU32> = Lazy::new(|| AtomicU32::new(rand::thread_rng().gen_range(0..0x0100_0000)));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identifier must be 24 hex characters")]
pub struct InvalidPostId;

impl PostId {
    pub fn new() -> Self {
        let secs = Utc::now().timestamp() as u32;
        let count = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Self(bytes)
    }
}

impl Default for PostId {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for PostId {
    type Err = InvalidPostId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 24 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidPostId);
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidPostId)?;
        Ok(Self(bytes))
    }
}

impl Serialize for PostId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PostId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------- storage shapes ----------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: PostId,
    pub text: String,
    pub delete_password_hash: String,
    pub reported: bool,
    pub created_on: DateTime<Utc>,
    pub bumped_on: DateTime<Utc>,
    pub replies: Vec<ReplyRecord>, // insertion order == chronological
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRecord {
    pub id: PostId,
    pub text: String,
    pub delete_password_hash: String,
    pub reported: bool,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewThread {
    pub text: String,
    pub delete_password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewReply {
    pub text: String,
    pub delete_password_hash: String,
}

// ---------------- response shapes ----------------
// These carry neither `reported` nor the secret hash.

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplyView {
    #[serde(rename = "_id")]
    #[schema(value_type = String, example = "5d993e154a8df56eec660452")]
    pub id: PostId,
    pub text: String,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThreadView {
    #[serde(rename = "_id")]
    #[schema(value_type = String, example = "5d993e154a8df56eec660452")]
    pub id: PostId,
    pub text: String,
    pub created_on: DateTime<Utc>,
    pub bumped_on: DateTime<Utc>,
    pub replies: Vec<ReplyView>,
}

impl From<&ReplyRecord> for ReplyView {
    fn from(r: &ReplyRecord) -> Self {
        Self { id: r.id, text: r.text.clone(), created_on: r.created_on }
    }
}

impl ThreadView {
    /// Full thread, every reply in stored order.
    pub fn detail(t: &ThreadRecord) -> Self {
        Self {
            id: t.id,
            text: t.text.clone(),
            created_on: t.created_on,
            bumped_on: t.bumped_on,
            replies: t.replies.iter().map(ReplyView::from).collect(),
        }
    }

    /// Listing form: only the `cap` latest replies, newest first.
    pub fn summary(t: &ThreadRecord, cap: usize) -> Self {
        let mut latest: Vec<&ReplyRecord> = t.replies.iter().rev().collect();
        // stable: equal timestamps keep reverse insertion order
        latest.sort_by(|a, b| b.created_on.cmp(&a.created_on));
        latest.truncate(cap);
        Self {
            id: t.id,
            text: t.text.clone(),
            created_on: t.created_on,
            bumped_on: t.bumped_on,
            replies: latest.into_iter().map(ReplyView::from).collect(),
        }
    }
}

// ---------------- request field bags ----------------
// Every field is optional so that validation can name the first missing one.

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ThreadFields {
    pub text: Option<String>,
    pub delete_password: Option<String>,
    pub thread_id: Option<String>,
    pub reply_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ThreadQuery {
    pub thread_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reply(text: &str, created_on: DateTime<Utc>) -> ReplyRecord {
        ReplyRecord { id: PostId::new(), text: text.into(), delete_password_hash: "h".into(), reported: false, created_on }
    }

    #[test]
    fn post_id_roundtrips_through_hex() {
        let id = PostId::new();
        let s = id.to_string();
        assert_eq!(s.len(), 24);
        assert_eq!(s.parse::<PostId>().unwrap(), id);
        assert_eq!(s.to_uppercase().parse::<PostId>().unwrap(), id);
    }

    #[test]
    fn post_id_rejects_malformed_input() {
        for bad in ["", "abc", "5d993e154a8df56eec6604m2", "5d993e154a8df56eec66045", "5d993e154a8df56eec6604520"] {
            assert_eq!(bad.parse::<PostId>(), Err(InvalidPostId), "{bad}");
        }
    }

    #[test]
    fn post_ids_are_unique() {
        let a = PostId::new();
        let b = PostId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn summary_keeps_three_latest_newest_first() {
        let base = Utc::now();
        let thread = ThreadRecord {
            id: PostId::new(),
            text: "op".into(),
            delete_password_hash: "h".into(),
            reported: true,
            created_on: base,
            bumped_on: base,
            replies: (0..5).map(|i| reply(&format!("r{i}"), base + Duration::seconds(i))).collect(),
        };
        let view = ThreadView::summary(&thread, 3);
        let texts: Vec<_> = view.replies.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, ["r4", "r3", "r2"]);
        // storage untouched
        assert_eq!(thread.replies[0].text, "r0");

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("reported").is_none());
        assert!(json.get("delete_password_hash").is_none());
        assert!(json["replies"][0].get("reported").is_none());
        assert!(json.get("_id").is_some());
    }

    #[test]
    fn summary_breaks_timestamp_ties_by_insertion() {
        let now = Utc::now();
        let thread = ThreadRecord {
            id: PostId::new(),
            text: "op".into(),
            delete_password_hash: "h".into(),
            reported: false,
            created_on: now,
            bumped_on: now,
            replies: (0..4).map(|i| reply(&format!("r{i}"), now)).collect(),
        };
        let texts: Vec<_> = ThreadView::summary(&thread, 3).replies.into_iter().map(|r| r.text).collect();
        assert_eq!(texts, ["r3", "r2", "r1"]);
    }
}
