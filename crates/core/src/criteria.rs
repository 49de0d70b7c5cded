//! What the caller is looking for in one search session.

use std::collections::BTreeMap;

use crate::config::SearchConfig;
use crate::provider::ProviderId;
use crate::record::CoverSlot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    pub isbn: String,
    pub strict_isbn: bool,
    pub author: String,
    pub title: String,
    pub publisher: String,
    pub external_ids: BTreeMap<ProviderId, String>,
    pub fetch_covers: [bool; 2],
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            isbn: String::new(),
            strict_isbn: true,
            author: String::new(),
            title: String::new(),
            publisher: String::new(),
            external_ids: BTreeMap::new(),
            fetch_covers: [false, false],
        }
    }
}

impl SearchCriteria {
    /// Strictness and cover flags come from the user's configuration.
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            strict_isbn: config.strict_isbn,
            fetch_covers: [config.fetch_front_cover, config.fetch_back_cover],
            ..Self::default()
        }
    }

    pub fn isbn(mut self, isbn: impl Into<String>) -> Self {
        self.isbn = isbn.into();
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_isbn = strict;
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = publisher.into();
        self
    }

    pub fn external_id(mut self, provider: ProviderId, id: impl Into<String>) -> Self {
        self.external_ids.insert(provider, id.into());
        self
    }

    pub fn fetch_cover(mut self, slot: CoverSlot, fetch: bool) -> Self {
        self.fetch_covers[slot.index()] = fetch;
        self
    }

    pub fn wants_cover(&self, slot: CoverSlot) -> bool {
        self.fetch_covers[slot.index()]
    }

    pub fn external_id_for(&self, provider: ProviderId) -> Option<&str> {
        self.external_ids
            .get(&provider)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn has_external_ids(&self) -> bool {
        self.external_ids.values().any(|s| !s.trim().is_empty())
    }

    /// A session needs at least one criterion that can lead to a book.
    pub fn has_anchor_candidate(&self) -> bool {
        !self.isbn.trim().is_empty()
            || self.has_external_ids()
            || !self.author.trim().is_empty()
            || !self.title.trim().is_empty()
    }
}
