//! Provider identity: stable ids, capability sets, reliability rank.
//!
//! Ids are persisted in user preferences and must never be reused or
//! renumbered once shipped.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub u32);

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ProviderId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ProviderId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    ByExternalId,
    ByIsbn,
    ByBarcode,
    ByText,
    CoverByIsbn,
    AlternativeEditions,
    ViewByExternalId,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::ByExternalId,
        Capability::ByIsbn,
        Capability::ByBarcode,
        Capability::ByText,
        Capability::CoverByIsbn,
        Capability::AlternativeEditions,
        Capability::ViewByExternalId,
    ];

    pub const SEARCH: [Capability; 4] = [
        Capability::ByExternalId,
        Capability::ByIsbn,
        Capability::ByBarcode,
        Capability::ByText,
    ];

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Small bit set over [`Capability`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn of(caps: &[Capability]) -> Self {
        caps.iter().fold(Self::empty(), |acc, c| acc.with(*c))
    }

    pub fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    pub fn insert(&mut self, cap: Capability) {
        self.0 |= cap.bit();
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn contains_any(&self, caps: &[Capability]) -> bool {
        caps.iter().any(|c| self.contains(*c))
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for Capabilities {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Cheap local check whether a provider can be used right now (for
/// example, credentials configured).
pub type AvailabilityCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Static identity of one external metadata source.
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub name: String,
    pub capabilities: Capabilities,
    /// Position in the default reliability order; lower is more reliable.
    pub rank: u32,
    pub enabled_by_default: bool,
    available: AvailabilityCheck,
}

impl ProviderDescriptor {
    pub fn new(id: u32, name: impl Into<String>, capabilities: &[Capability], rank: u32) -> Self {
        Self {
            id: ProviderId(id),
            name: name.into(),
            capabilities: Capabilities::of(capabilities),
            rank,
            enabled_by_default: true,
            available: Arc::new(|| true),
        }
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    pub fn with_availability(mut self, check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.available = Arc::new(check);
        self
    }

    pub fn is_available(&self) -> bool {
        (self.available)()
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("rank", &self.rank)
            .field("enabled_by_default", &self.enabled_by_default)
            .finish()
    }
}

/// The providers this build knows about, in no particular order.
pub fn builtin_providers() -> Vec<ProviderDescriptor> {
    use Capability::*;
    vec![
        ProviderDescriptor::new(1, "Google Books", &[ByIsbn, ByText, CoverByIsbn], 4),
        ProviderDescriptor::new(
            2,
            "Amazon",
            &[ByExternalId, ByIsbn, ByBarcode, CoverByIsbn, ViewByExternalId],
            2,
        ),
        ProviderDescriptor::new(3, "LibraryThing", &[AlternativeEditions, ViewByExternalId], 7)
            .disabled_by_default(),
        ProviderDescriptor::new(4, "Goodreads", &[ViewByExternalId], 8),
        ProviderDescriptor::new(
            5,
            "ISFDB",
            &[ByExternalId, ByIsbn, ByText, CoverByIsbn, AlternativeEditions, ViewByExternalId],
            1,
        ),
        ProviderDescriptor::new(6, "Open Library", &[ByExternalId, ByIsbn, CoverByIsbn, ViewByExternalId], 3),
        ProviderDescriptor::new(7, "KB Netherlands", &[ByIsbn, ByBarcode, CoverByIsbn], 6).disabled_by_default(),
        ProviderDescriptor::new(8, "StripInfo", &[ByExternalId, ByIsbn, ByBarcode, CoverByIsbn, ViewByExternalId], 5)
            .disabled_by_default(),
        ProviderDescriptor::new(9, "LastDodo", &[ByExternalId, ByIsbn, ViewByExternalId], 9).disabled_by_default(),
    ]
}
