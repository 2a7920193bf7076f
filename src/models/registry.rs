use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path};

/// Files every artifact is made of, in archive order
pub const PAYLOAD_FILES: [&str; 5] = [
    "image.jpg",
    "model.json",
    "compiled.data",
    "data_set.json",
    "model.data",
];

/// Registry-assigned artifact identifier (a UUID, treated as opaque).
///
/// Identifiers name directories and files on disk, so one read from a
/// listing must be a single plain path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this artifact's bundle in an archive store
    #[must_use]
    pub fn archive_name(&self) -> String {
        format!("{}.tar.gz", self.0)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = String;

    fn try_from(id: String) -> std::result::Result<Self, Self::Error> {
        let mut components = Path::new(&id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) if part.to_str() == Some(id.as_str()) => {
                Ok(Self(id))
            }
            _ => Err(format!("invalid artifact id '{id}'")),
        }
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

impl From<&str> for ArtifactId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One entry of a registry listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    #[serde(rename = "uuid")]
    pub id: ArtifactId,
    #[serde(default)]
    pub name: String,
}

impl ArtifactRecord {
    #[must_use]
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: ArtifactId::new(id),
            name: name.to_string(),
        }
    }
}

/// What a batch operation should act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every artifact the source knows about
    All,
    /// A name, or an identifier when no name matches
    Selector(String),
}

impl Selection {
    /// Parse a CLI argument; `-all` selects everything
    #[must_use]
    pub fn parse(arg: &str) -> Self {
        if arg == "-all" || arg == "--all" {
            Self::All
        } else {
            Self::Selector(arg.to_string())
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("-all"),
            Self::Selector(s) => f.write_str(s),
        }
    }
}

/// Snapshot of a registry's artifact records, in listing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    records: Vec<ArtifactRecord>,
}

impl Listing {
    #[must_use]
    pub const fn new(records: Vec<ArtifactRecord>) -> Self {
        Self { records }
    }

    #[must_use]
    pub fn records(&self) -> &[ArtifactRecord] {
        &self.records
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn ids(&self) -> BTreeSet<ArtifactId> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    #[must_use]
    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.records.iter().any(|r| &r.id == id)
    }

    /// Resolve a selector: name matches first, identifier as fallback.
    ///
    /// Returns matches in listing order; empty when nothing matches.
    #[must_use]
    pub fn resolve(&self, selector: &str) -> Vec<ArtifactId> {
        let mut by_name: Vec<ArtifactId> = Vec::new();
        for record in self.records.iter().filter(|r| r.name == selector) {
            if !by_name.contains(&record.id) {
                by_name.push(record.id.clone());
            }
        }
        if !by_name.is_empty() {
            return by_name;
        }

        self.records
            .iter()
            .find(|r| r.id.as_str() == selector)
            .map(|r| vec![r.id.clone()])
            .unwrap_or_default()
    }

    /// Candidate identifiers for a selection
    #[must_use]
    pub fn select(&self, selection: &Selection) -> BTreeSet<ArtifactId> {
        match selection {
            Selection::All => self.ids(),
            Selection::Selector(s) => self.resolve(s).into_iter().collect(),
        }
    }

    /// Find closest name using Levenshtein distance
    #[must_use]
    pub fn suggest(&self, selector: &str) -> Option<String> {
        if selector.is_empty() {
            return None;
        }

        self.records
            .iter()
            .filter(|r| !r.name.is_empty())
            .map(|r| (r.name.as_str(), levenshtein_distance(selector, &r.name)))
            .min_by_key(|(_, dist)| *dist)
            .filter(|(_, dist)| *dist <= 2) // Only suggest if within 2 edits
            .map(|(name, _)| name.to_string())
    }
}

/// Calculate Levenshtein distance between two strings
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s2_chars: Vec<char> = s2.chars().collect();
    let mut prev: Vec<usize> = (0..=s2_chars.len()).collect();

    for (i, c1) in s1.chars().enumerate() {
        let mut row = Vec::with_capacity(prev.len());
        row.push(i + 1);
        for (j, c2) in s2_chars.iter().enumerate() {
            let cost = usize::from(c1 != *c2);
            let value = (prev[j + 1] + 1).min(row[j] + 1).min(prev[j] + cost);
            row.push(value);
        }
        prev = row;
    }

    prev[s2_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Listing {
        Listing::new(vec![
            ArtifactRecord::new("a1", "face"),
            ArtifactRecord::new("b2", "pose"),
            ArtifactRecord::new("c3", "face"),
            ArtifactRecord::new("face", "alias"),
        ])
    }

    #[test]
    fn test_resolve_by_name_first() {
        let ids = listing().resolve("face");
        assert_eq!(ids, vec![ArtifactId::from("a1"), ArtifactId::from("c3")]);
    }

    #[test]
    fn test_resolve_falls_back_to_identifier() {
        assert_eq!(listing().resolve("b2"), vec![ArtifactId::from("b2")]);
    }

    #[test]
    fn test_resolve_no_match_is_empty() {
        assert!(listing().resolve("ghost").is_empty());
    }

    #[test]
    fn test_select_all() {
        let ids = listing().select(&Selection::All);
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_selection_parse() {
        assert_eq!(Selection::parse("-all"), Selection::All);
        assert_eq!(
            Selection::parse("face"),
            Selection::Selector("face".to_string())
        );
    }

    #[test]
    fn test_record_deserialize_ignores_extra_fields() {
        let record: ArtifactRecord =
            serde_json::from_str(r#"{"uuid": "a1", "name": "face", "size": 12}"#).unwrap();
        assert_eq!(record, ArtifactRecord::new("a1", "face"));
    }

    #[test]
    fn test_record_rejects_unsafe_ids() {
        for id in ["", ".", "..", "a/b", "../a1", "/a1", "a1/"] {
            let json = serde_json::json!({ "uuid": id, "name": "face" });
            assert!(
                serde_json::from_value::<ArtifactRecord>(json).is_err(),
                "'{id}' must be rejected"
            );
        }
        let record: ArtifactRecord =
            serde_json::from_value(serde_json::json!({ "uuid": "3f2a-b1", "name": "x" })).unwrap();
        assert_eq!(record.id.as_str(), "3f2a-b1");
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(ArtifactId::from("a1").archive_name(), "a1.tar.gz");
    }

    #[test]
    fn test_suggest() {
        let listing = listing();
        assert_eq!(listing.suggest("fase"), Some("face".to_string()));
        assert_eq!(listing.suggest("pos"), Some("pose".to_string()));
        assert_eq!(listing.suggest("invalid123"), None);
        assert_eq!(listing.suggest(""), None);
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("face", "face"), 0);
        assert_eq!(levenshtein_distance("face", "facee"), 1);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }
}
