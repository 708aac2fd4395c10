use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A station record as served by the remote directory.
///
/// Only `url`, `name` and `tags` are interpreted. Every other field the
/// directory sends is kept in `extra` so the cache file round-trips it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Station {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub tags: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Station {
    pub fn new(name: impl Into<String>, url: impl Into<String>, tags: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            tags: tags.into(),
            extra: Map::new(),
        }
    }

    /// Case-insensitive substring match against the tag list.
    ///
    /// `needle` must already be normalized with [`normalize_tag`].
    pub fn matches_tag(&self, needle: &str) -> bool {
        normalize_tag(&self.tags).contains(needle)
    }
}

// Identity is the stream URL.
impl PartialEq for Station {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Station {}

pub fn normalize_tag(input: &str) -> String {
    input.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_not_token_match() {
        let station = Station::new("Punks", "http://a/stream", "punk,rock");
        assert!(station.matches_tag(&normalize_tag("pun")));
        assert!(station.matches_tag(&normalize_tag("  ROCK ")));
        assert!(!station.matches_tag(&normalize_tag("jazz")));
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = r#"{"name":"X","url":"http://x","tags":"jazz","votes":12,"codec":"MP3"}"#;
        let station: Station = serde_json::from_str(raw).unwrap();
        assert_eq!(station.extra.get("votes"), Some(&Value::from(12)));

        let back = serde_json::to_value(&station).unwrap();
        assert_eq!(back["codec"], "MP3");
        assert_eq!(back["tags"], "jazz");
    }

    #[test]
    fn identity_is_the_url() {
        let a = Station::new("A", "http://same", "x");
        let b = Station::new("B", "http://same", "y");
        assert_eq!(a, b);
    }
}
