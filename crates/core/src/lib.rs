pub mod accumulate;
pub mod adapter;
pub mod config;
pub mod coordinator;
pub mod cover;
pub mod criteria;
pub mod dates;
pub mod download;
pub mod error;
pub mod events;
pub mod isbn;
pub mod mapper;
pub mod network;
pub mod persist;
pub mod progress;
pub mod provider;
pub mod record;
pub mod registry;
pub mod task;

pub mod prelude {
    pub use crate::adapter::{CoverSize, ProviderAdapter, SearchContext, SearchRequest, TextQuery};
    pub use crate::coordinator::SearchCoordinator;
    pub use crate::criteria::SearchCriteria;
    pub use crate::error::*;
    pub use crate::events::{SearchEvents, SearchOutcome};
    pub use crate::provider::{Capability, ProviderDescriptor, ProviderId};
    pub use crate::record::*;
    pub use crate::registry::{ListType, SiteRegistry};
}
