//! Site registry: per use-case, ordered and user-configurable provider lists.
//!
//! Defaults are derived from the provider descriptors (capabilities decide
//! which lists a provider appears in, rank decides the order). Persisted
//! user preferences are overlaid on top; anything malformed in them is
//! ignored rather than reported.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::persist::{MemorySitePersistence, SitePersistence};
use crate::provider::{Capabilities, Capability, ProviderDescriptor, ProviderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListType {
    /// General book data search.
    Data,
    /// Cover-only search.
    Covers,
    /// Alternate edition lookup.
    AltEditions,
    /// "View this book on the site" links.
    ViewOnSite,
}

impl ListType {
    pub const ALL: [ListType; 4] = [
        ListType::Data,
        ListType::Covers,
        ListType::AltEditions,
        ListType::ViewOnSite,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ListType::Data => "data",
            ListType::Covers => "covers",
            ListType::AltEditions => "alted",
            ListType::ViewOnSite => "view",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.key() == key)
    }

    fn accepts(self, caps: &Capabilities) -> bool {
        match self {
            ListType::Data => caps.contains_any(&Capability::SEARCH),
            ListType::Covers => caps.contains(Capability::CoverByIsbn),
            ListType::AltEditions => caps.contains(Capability::AlternativeEditions),
            ListType::ViewOnSite => caps.contains(Capability::ViewByExternalId),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Site {
    pub provider: ProviderId,
    pub list_type: ListType,
    pub enabled: bool,
}

pub struct SiteRegistry {
    descriptors: BTreeMap<ProviderId, ProviderDescriptor>,
    lists: RwLock<BTreeMap<ListType, Vec<Site>>>,
    persistence: Arc<dyn SitePersistence>,
}

impl SiteRegistry {
    pub fn load(descriptors: Vec<ProviderDescriptor>, persistence: Arc<dyn SitePersistence>) -> Self {
        let descriptors: BTreeMap<ProviderId, ProviderDescriptor> =
            descriptors.into_iter().map(|d| (d.id, d)).collect();
        let lists = ListType::ALL
            .into_iter()
            .map(|list| (list, load_list(&descriptors, persistence.as_ref(), list)))
            .collect();
        Self {
            descriptors,
            lists: RwLock::new(lists),
            persistence,
        }
    }

    /// Registry with hardcoded defaults and nothing persisted.
    pub fn with_defaults(descriptors: Vec<ProviderDescriptor>) -> Self {
        Self::load(descriptors, Arc::new(MemorySitePersistence::new()))
    }

    pub fn descriptor(&self, id: ProviderId) -> Option<&ProviderDescriptor> {
        self.descriptors.get(&id)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.descriptors.values()
    }

    pub fn name_of(&self, id: ProviderId) -> String {
        self.descriptor(id)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| format!("provider {}", id))
    }

    /// Copy of the list, disabled sites included.
    pub fn list_for(&self, list: ListType) -> Vec<Site> {
        self.read().get(&list).cloned().unwrap_or_default()
    }

    pub fn enabled_for(&self, list: ListType) -> Vec<Site> {
        self.list_for(list).into_iter().filter(|s| s.enabled).collect()
    }

    /// Replace the order (and enablement) of `list`. Sites that do not
    /// belong to the list are ignored; sites missing from `sites` keep
    /// their current state and go to the end.
    pub fn set_order(&self, list: ListType, sites: Vec<Site>) {
        let current = self.list_for(list);
        let mut next: Vec<Site> = Vec::with_capacity(current.len());
        for site in sites {
            if site.list_type != list || next.iter().any(|s| s.provider == site.provider) {
                continue;
            }
            if current.iter().any(|s| s.provider == site.provider) {
                next.push(site);
            }
        }
        for site in current {
            if !next.iter().any(|s| s.provider == site.provider) {
                next.push(site);
            }
        }

        for site in &next {
            if let Err(e) = self.persistence.set_enabled(list, site.provider, site.enabled) {
                tracing::warn!("Could not persist site {}: {}", site.provider, e);
            }
        }
        if let Err(e) = self.persistence.set_order(list, &order_csv(&next)) {
            tracing::warn!("Could not persist {} order: {}", list.key(), e);
        }
        self.write().insert(list, next);
    }

    /// Returns false when the provider has no site in `list`.
    pub fn set_enabled(&self, list: ListType, provider: ProviderId, enabled: bool) -> bool {
        let mut sites = self.list_for(list);
        match sites.iter_mut().find(|s| s.provider == provider) {
            Some(site) => site.enabled = enabled,
            None => return false,
        }
        self.set_order(list, sites);
        true
    }

    /// Drop user preferences for `list` and go back to the defaults.
    pub fn reset(&self, list: ListType) {
        if let Err(e) = self.persistence.clear(list) {
            tracing::warn!("Could not clear {} preferences: {}", list.key(), e);
        }
        let defaults = default_sites(&self.descriptors, list);
        self.write().insert(list, defaults);
    }

    /// The sites named in `csv`, in that order. Sites not named are left
    /// out of the result; unknown or malformed ids are skipped.
    pub fn reorder(sites: &[Site], csv: &str) -> Vec<Site> {
        let mut out: Vec<Site> = Vec::new();
        for id in csv.split(',').filter_map(|t| t.parse::<ProviderId>().ok()) {
            if out.iter().any(|s| s.provider == id) {
                continue;
            }
            if let Some(site) = sites.iter().find(|s| s.provider == id) {
                out.push(site.clone());
            }
        }
        out
    }

    /// Fixed ranking used to settle merge conflicts, independent of the
    /// user's search order.
    pub fn reliability_order(&self) -> Vec<ProviderId> {
        let mut ranked: Vec<&ProviderDescriptor> = self.descriptors.values().collect();
        ranked.sort_by_key(|d| (d.rank, d.id));
        let csv = ranked.iter().map(|d| d.id.to_string()).collect::<Vec<_>>().join(",");
        Self::reorder(&self.list_for(ListType::Data), &csv)
            .into_iter()
            .map(|s| s.provider)
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<ListType, Vec<Site>>> {
        self.lists.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<ListType, Vec<Site>>> {
        self.lists.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for SiteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteRegistry")
            .field("descriptors", &self.descriptors.len())
            .field("lists", &*self.read())
            .finish()
    }
}

fn order_csv(sites: &[Site]) -> String {
    sites.iter().map(|s| s.provider.to_string()).collect::<Vec<_>>().join(",")
}

fn default_sites(descriptors: &BTreeMap<ProviderId, ProviderDescriptor>, list: ListType) -> Vec<Site> {
    let mut eligible: Vec<&ProviderDescriptor> = descriptors
        .values()
        .filter(|d| list.accepts(&d.capabilities))
        .collect();
    eligible.sort_by_key(|d| (d.rank, d.id));
    eligible
        .into_iter()
        .map(|d| Site {
            provider: d.id,
            list_type: list,
            enabled: d.enabled_by_default,
        })
        .collect()
}

fn load_list(
    descriptors: &BTreeMap<ProviderId, ProviderDescriptor>,
    persistence: &dyn SitePersistence,
    list: ListType,
) -> Vec<Site> {
    let mut sites = default_sites(descriptors, list);
    for site in &mut sites {
        if let Some(enabled) = persistence.enabled(list, site.provider) {
            site.enabled = enabled;
        }
    }

    let Some(csv) = persistence.order(list) else {
        return sites;
    };
    let mut ordered = SiteRegistry::reorder(&sites, &csv);
    if ordered.len() < sites.len() {
        // Providers added since the order was saved go to the end.
        for site in sites {
            if !ordered.iter().any(|s| s.provider == site.provider) {
                ordered.push(site);
            }
        }
        let csv = order_csv(&ordered);
        tracing::debug!("Extending persisted {} order to {}", list.key(), csv);
        if let Err(e) = persistence.set_order(list, &csv) {
            tracing::warn!("Could not persist {} order: {}", list.key(), e);
        }
    }
    ordered
}
