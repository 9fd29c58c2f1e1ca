//! Tag model and canonical forms
//!
//! Tags arrive as flat strings or key=value pairs and normalize to one of
//! two canonical labels: `tag:<string>` or `tag:<k>=<v>`. The canonical
//! label doubles as the bitmap name in the metadata store, and `docs.tags`
//! holds a JSON array of canonical labels.

use serde::{Deserialize, Serialize};

use crate::error::{RecollexError, Result};

/// Prefix shared by every tag bitmap name
pub const TAG_PREFIX: &str = "tag:";

/// Longest accepted canonical label (prefix included)
pub const MAX_TAG_LEN: usize = 512;

/// Sentinel that disables a scoping list
pub const EVERYTHING: &str = "everything";

/// A normalized tag label
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// Flat label, canonical form `tag:<string>`
    Flat(String),
    /// Structured label, canonical form `tag:<k>=<v>`
    Kv(String, String),
}

impl Tag {
    pub fn flat(s: impl Into<String>) -> Self {
        Tag::Flat(s.into())
    }

    pub fn kv(k: impl Into<String>, v: impl Into<String>) -> Self {
        Tag::Kv(k.into(), v.into())
    }

    /// Canonical label, which is also the bitmap name
    pub fn canonical(&self) -> String {
        match self {
            Tag::Flat(s) => format!("{TAG_PREFIX}{s}"),
            Tag::Kv(k, v) => format!("{TAG_PREFIX}{k}={v}"),
        }
    }

    /// Parse a canonical label back into a tag. A label containing `=`
    /// normalizes to the structured form.
    pub fn from_canonical(label: &str) -> Option<Tag> {
        let body = label.strip_prefix(TAG_PREFIX)?;
        match body.split_once('=') {
            Some((k, v)) => Some(Tag::Kv(k.to_string(), v.to_string())),
            None => Some(Tag::Flat(body.to_string())),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let label = self.canonical();
        if label.len() > MAX_TAG_LEN {
            return Err(RecollexError::Validation(format!(
                "tag label exceeds {MAX_TAG_LEN} bytes: {:.32}…",
                label
            )));
        }
        if label.len() == TAG_PREFIX.len() {
            return Err(RecollexError::Validation("empty tag label".to_string()));
        }
        Ok(())
    }
}

/// Serialize a tag list to the canonical JSON payload stored in `docs.tags`
pub fn to_json(tags: &[Tag]) -> Result<String> {
    let labels: Vec<String> = tags.iter().map(Tag::canonical).collect();
    Ok(serde_json::to_string(&labels)?)
}

/// Parse the canonical JSON payload back into tags. Materialized lazily on
/// result hydration; a null/empty payload is an empty list.
pub fn from_json(payload: Option<&str>) -> Result<Vec<Tag>> {
    let Some(payload) = payload else {
        return Ok(Vec::new());
    };
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let labels: Vec<String> = serde_json::from_str(payload)?;
    Ok(labels
        .iter()
        .filter_map(|l| Tag::from_canonical(l))
        .collect())
}

/// A scoping list over tag labels, with the `everything` escape hatch
#[derive(Clone, Debug, Default)]
pub struct TagScope {
    labels: Vec<String>,
    disabled: bool,
}

impl TagScope {
    /// Build from caller input. The literal `everything` anywhere in the
    /// list disables the whole list.
    pub fn new<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        let mut labels = Vec::new();
        let mut disabled = false;
        for t in tags {
            let tag: Tag = t.into();
            if matches!(&tag, Tag::Flat(s) if s == EVERYTHING) {
                disabled = true;
                continue;
            }
            labels.push(tag.canonical());
        }
        Self { labels, disabled }
    }

    /// True when the list imposes no restriction
    pub fn is_unrestricted(&self) -> bool {
        self.disabled || self.labels.is_empty()
    }

    /// Canonical bitmap names in this scope
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Tag::Flat(s.to_string())
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        Tag::Flat(s)
    }
}

impl From<(&str, &str)> for Tag {
    fn from((k, v): (&str, &str)) -> Self {
        Tag::Kv(k.to_string(), v.to_string())
    }
}

impl From<(String, String)> for Tag {
    fn from((k, v): (String, String)) -> Self {
        Tag::Kv(k, v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_forms() {
        assert_eq!(Tag::flat("t:a").canonical(), "tag:t:a");
        assert_eq!(Tag::kv("lang", "en").canonical(), "tag:lang=en");
    }

    #[test]
    fn test_from_canonical() {
        assert_eq!(Tag::from_canonical("tag:t:a"), Some(Tag::flat("t:a")));
        assert_eq!(
            Tag::from_canonical("tag:lang=en"),
            Some(Tag::kv("lang", "en"))
        );
        assert_eq!(Tag::from_canonical("term:10"), None);
    }

    #[test]
    fn test_json_roundtrip() {
        let tags = vec![Tag::flat("t:a"), Tag::kv("k", "v")];
        let payload = to_json(&tags).unwrap();
        assert_eq!(payload, r#"["tag:t:a","tag:k=v"]"#);
        assert_eq!(from_json(Some(&payload)).unwrap(), tags);
        assert!(from_json(None).unwrap().is_empty());
    }

    #[test]
    fn test_validation() {
        assert!(Tag::flat("ok").validate().is_ok());
        assert!(Tag::flat("").validate().is_err());
        assert!(Tag::flat("x".repeat(MAX_TAG_LEN)).validate().is_err());
    }

    #[test]
    fn test_scope_everything() {
        let scope = TagScope::new(["t:a", EVERYTHING, "t:b"]);
        assert!(scope.is_unrestricted());

        let scope = TagScope::new(["t:a", "t:b"]);
        assert!(!scope.is_unrestricted());
        assert_eq!(scope.labels(), &["tag:t:a", "tag:t:b"]);

        let empty: TagScope = TagScope::new(Vec::<Tag>::new());
        assert!(empty.is_unrestricted());
    }

    #[test]
    fn test_kv_scope() {
        let scope = TagScope::new([("lang", "en"), ("topic", "db")]);
        assert_eq!(scope.labels(), &["tag:lang=en", "tag:topic=db"]);
    }
}
