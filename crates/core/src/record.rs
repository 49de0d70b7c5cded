//! Book records as providers return them and as the merge produces them.
//!
//! A record is a map from a closed set of well-known field keys to a small
//! tagged value. How a field is folded during the merge is a property of
//! its key ([`FieldKey::kind`]), never of the runtime value shape.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::provider::ProviderId;

/// Logical cover image position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CoverSlot {
    Front = 0,
    Back = 1,
}

impl CoverSlot {
    pub const ALL: [CoverSlot; 2] = [CoverSlot::Front, CoverSlot::Back];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(CoverSlot::Front),
            1 => Some(CoverSlot::Back),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// First non-empty value wins.
    Scalar,
    /// Values are concatenated in merge order.
    List,
    /// First value wins unless it fails date validation.
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKey {
    Isbn,
    Title,
    OriginalTitle,
    Description,
    Language,
    Pages,
    Format,
    Color,
    Genre,
    PrintRun,
    ListPrice,
    ListPriceCurrency,
    DatePublished,
    FirstPublicationDate,
    Authors,
    Series,
    Publishers,
    Toc,
    /// The provider-specific id of the book on that provider's site.
    ExternalId(ProviderId),
    /// Downloaded cover files competing for a slot.
    CoverCandidates(CoverSlot),
    /// The cover file that survived selection.
    Cover(CoverSlot),
}

impl FieldKey {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldKey::DatePublished | FieldKey::FirstPublicationDate => FieldKind::Date,
            FieldKey::Authors
            | FieldKey::Series
            | FieldKey::Publishers
            | FieldKey::Toc
            | FieldKey::CoverCandidates(_) => FieldKind::List,
            _ => FieldKind::Scalar,
        }
    }

    fn simple_name(&self) -> Option<&'static str> {
        Some(match self {
            FieldKey::Isbn => "isbn",
            FieldKey::Title => "title",
            FieldKey::OriginalTitle => "original_title",
            FieldKey::Description => "description",
            FieldKey::Language => "language",
            FieldKey::Pages => "pages",
            FieldKey::Format => "format",
            FieldKey::Color => "color",
            FieldKey::Genre => "genre",
            FieldKey::PrintRun => "print_run",
            FieldKey::ListPrice => "list_price",
            FieldKey::ListPriceCurrency => "list_price_currency",
            FieldKey::DatePublished => "date_published",
            FieldKey::FirstPublicationDate => "first_publication_date",
            FieldKey::Authors => "authors",
            FieldKey::Series => "series",
            FieldKey::Publishers => "publishers",
            FieldKey::Toc => "toc",
            FieldKey::ExternalId(_) | FieldKey::CoverCandidates(_) | FieldKey::Cover(_) => return None,
        })
    }

    const SIMPLE: [FieldKey; 18] = [
        FieldKey::Isbn,
        FieldKey::Title,
        FieldKey::OriginalTitle,
        FieldKey::Description,
        FieldKey::Language,
        FieldKey::Pages,
        FieldKey::Format,
        FieldKey::Color,
        FieldKey::Genre,
        FieldKey::PrintRun,
        FieldKey::ListPrice,
        FieldKey::ListPriceCurrency,
        FieldKey::DatePublished,
        FieldKey::FirstPublicationDate,
        FieldKey::Authors,
        FieldKey::Series,
        FieldKey::Publishers,
        FieldKey::Toc,
    ];
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKey::ExternalId(id) => write!(f, "external_id:{}", id),
            FieldKey::CoverCandidates(slot) => write!(f, "cover_candidates:{}", slot.index()),
            FieldKey::Cover(slot) => write!(f, "cover:{}", slot.index()),
            other => f.write_str(other.simple_name().unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown field key: {0}")]
pub struct UnknownFieldKey(pub String);

impl FromStr for FieldKey {
    type Err = UnknownFieldKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownFieldKey(s.to_string());
        if let Some((prefix, arg)) = s.split_once(':') {
            return match prefix {
                "external_id" => arg.parse().map(FieldKey::ExternalId).map_err(|_| unknown()),
                "cover_candidates" | "cover" => {
                    let slot = arg
                        .parse::<usize>()
                        .ok()
                        .and_then(CoverSlot::from_index)
                        .ok_or_else(unknown)?;
                    Ok(if prefix == "cover" {
                        FieldKey::Cover(slot)
                    } else {
                        FieldKey::CoverCandidates(slot)
                    })
                }
                _ => Err(unknown()),
            };
        }
        FieldKey::SIMPLE
            .into_iter()
            .find(|k| k.simple_name() == Some(s))
            .ok_or_else(unknown)
    }
}

impl Serialize for FieldKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherEntry {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_published: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entry {
    Author(AuthorEntry),
    Series(SeriesEntry),
    Publisher(PublisherEntry),
    Toc(TocEntry),
}

impl Entry {
    pub fn author(name: impl Into<String>) -> Self {
        Entry::Author(AuthorEntry {
            name: name.into(),
            role: None,
        })
    }

    pub fn series(title: impl Into<String>, number: Option<&str>) -> Self {
        Entry::Series(SeriesEntry {
            title: title.into(),
            number: number.map(String::from),
        })
    }

    pub fn publisher(name: impl Into<String>) -> Self {
        Entry::Publisher(PublisherEntry { name: name.into() })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    TextList(Vec<String>),
    Entries(Vec<Entry>),
    Empty,
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::TextList(v) => v.is_empty(),
            FieldValue::Entries(v) => v.is_empty(),
            FieldValue::Empty => true,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<Vec<Entry>> for FieldValue {
    fn from(v: Vec<Entry>) -> Self {
        FieldValue::Entries(v)
    }
}

/// One provider's raw answer, or the merged result of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<FieldKey, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: FieldKey, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: FieldKey, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.fields.insert(key, value.into())
    }

    pub fn get(&self, key: &FieldKey) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &FieldKey) -> Option<&mut FieldValue> {
        self.fields.get_mut(key)
    }

    pub fn remove(&mut self, key: &FieldKey) -> Option<FieldValue> {
        self.fields.remove(key)
    }

    pub fn contains(&self, key: &FieldKey) -> bool {
        self.fields.contains_key(key)
    }

    /// Text of a scalar field, `None` when absent, blank, or not text.
    pub fn text(&self, key: &FieldKey) -> Option<&str> {
        self.get(key)
            .and_then(FieldValue::as_text)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn has_value(&self, key: &FieldKey) -> bool {
        self.get(key).is_some_and(|v| !v.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &FieldValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Append a downloaded cover file to the candidate list of `slot`.
    pub fn add_cover_candidate(&mut self, slot: CoverSlot, path: PathBuf) {
        let key = FieldKey::CoverCandidates(slot);
        let path = path.to_string_lossy().into_owned();
        match self.fields.get_mut(&key) {
            Some(FieldValue::TextList(list)) => list.push(path),
            _ => {
                self.fields.insert(key, FieldValue::TextList(vec![path]));
            }
        }
    }

    pub fn cover_candidates(&self, slot: CoverSlot) -> Vec<PathBuf> {
        match self.get(&FieldKey::CoverCandidates(slot)) {
            Some(FieldValue::TextList(list)) => list.iter().map(PathBuf::from).collect(),
            _ => Vec::new(),
        }
    }
}

impl FromIterator<(FieldKey, FieldValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (FieldKey, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
