//! Provider adapters: one type, capabilities supplied as closures.
//!
//! An adapter wraps a [`ProviderDescriptor`] together with the query
//! functions the provider actually implements. The set of closures present
//! is the adapter's capability set; the coordinator picks one query per
//! task with [`ProviderAdapter::select_request`].
//!
//! Adapters run on worker threads and may block on network I/O. They
//! should poll [`SearchContext::is_cancelled`] between round-trips;
//! cancellation is a request, not a guarantee of prompt termination.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::criteria::SearchCriteria;
use crate::error::SearchError;
use crate::isbn::Isbn;
use crate::provider::{Capabilities, Capability, ProviderDescriptor, ProviderId};
use crate::record::{CoverSlot, Record};
use crate::task::{CancelToken, TaskListener};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoverSize {
    Large,
    Medium,
    Small,
}

impl CoverSize {
    /// Largest first.
    pub const PREFERENCE: [CoverSize; 3] = [CoverSize::Large, CoverSize::Medium, CoverSize::Small];

    pub fn suffix(self) -> &'static str {
        match self {
            CoverSize::Large => "L",
            CoverSize::Medium => "M",
            CoverSize::Small => "S",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextQuery {
    pub author: String,
    pub title: String,
    pub publisher: String,
}

/// The one query a task runs against its adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchRequest {
    ExternalId(String),
    Isbn(String),
    Barcode(String),
    Text(TextQuery),
}

impl SearchRequest {
    pub fn capability(&self) -> Capability {
        match self {
            SearchRequest::ExternalId(_) => Capability::ByExternalId,
            SearchRequest::Isbn(_) => Capability::ByIsbn,
            SearchRequest::Barcode(_) => Capability::ByBarcode,
            SearchRequest::Text(_) => Capability::ByText,
        }
    }

    /// The code searched for, when the request is code-based.
    pub fn code(&self) -> Option<&str> {
        match self {
            SearchRequest::Isbn(s) | SearchRequest::Barcode(s) => Some(s),
            _ => None,
        }
    }
}

/// Handed to every adapter call: identifies the provider, carries the
/// cancel flag, and forwards progress to whoever started the task.
#[derive(Clone)]
pub struct SearchContext {
    provider: ProviderId,
    cancel: CancelToken,
    listener: Option<Arc<dyn TaskListener>>,
}

impl SearchContext {
    pub fn new(provider: ProviderId, cancel: CancelToken) -> Self {
        Self {
            provider,
            cancel,
            listener: None,
        }
    }

    pub(crate) fn with_listener(mut self, listener: Arc<dyn TaskListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn progress(&self, message: &str, position: u32, max: u32) {
        if let Some(l) = &self.listener {
            l.on_progress(self.provider, message, position, max);
        }
    }
}

impl fmt::Debug for SearchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchContext")
            .field("provider", &self.provider)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

type QueryFn = Box<dyn Fn(&SearchContext, &str) -> Result<Record, SearchError> + Send + Sync>;
type TextFn = Box<dyn Fn(&SearchContext, &TextQuery) -> Result<Record, SearchError> + Send + Sync>;
type CoverFn =
    Box<dyn Fn(&SearchContext, &str, CoverSlot, CoverSize) -> Result<Option<PathBuf>, SearchError> + Send + Sync>;
type EditionsFn = Box<dyn Fn(&SearchContext, &str) -> Result<Vec<String>, SearchError> + Send + Sync>;
type ViewUrlFn = Box<dyn Fn(&str) -> String + Send + Sync>;

pub struct ProviderAdapter {
    descriptor: ProviderDescriptor,
    by_external_id: Option<QueryFn>,
    by_isbn: Option<QueryFn>,
    by_barcode: Option<QueryFn>,
    by_text: Option<TextFn>,
    cover: Option<CoverFn>,
    alt_editions: Option<EditionsFn>,
    view_url: Option<ViewUrlFn>,
    prefers_isbn10: bool,
    cover_sizes: Vec<CoverSize>,
}

impl ProviderAdapter {
    pub fn new(descriptor: ProviderDescriptor) -> Self {
        Self {
            descriptor,
            by_external_id: None,
            by_isbn: None,
            by_barcode: None,
            by_text: None,
            cover: None,
            alt_editions: None,
            view_url: None,
            prefers_isbn10: false,
            cover_sizes: vec![CoverSize::Large],
        }
    }

    pub fn by_external_id(
        mut self,
        f: impl Fn(&SearchContext, &str) -> Result<Record, SearchError> + Send + Sync + 'static,
    ) -> Self {
        self.by_external_id = Some(Box::new(f));
        self
    }

    pub fn by_isbn(
        mut self,
        f: impl Fn(&SearchContext, &str) -> Result<Record, SearchError> + Send + Sync + 'static,
    ) -> Self {
        self.by_isbn = Some(Box::new(f));
        self
    }

    pub fn by_barcode(
        mut self,
        f: impl Fn(&SearchContext, &str) -> Result<Record, SearchError> + Send + Sync + 'static,
    ) -> Self {
        self.by_barcode = Some(Box::new(f));
        self
    }

    pub fn by_text(
        mut self,
        f: impl Fn(&SearchContext, &TextQuery) -> Result<Record, SearchError> + Send + Sync + 'static,
    ) -> Self {
        self.by_text = Some(Box::new(f));
        self
    }

    /// `sizes` lists the hints the provider understands; an empty list
    /// means a single unsized attempt.
    pub fn cover_by_isbn(
        mut self,
        sizes: &[CoverSize],
        f: impl Fn(&SearchContext, &str, CoverSlot, CoverSize) -> Result<Option<PathBuf>, SearchError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.cover = Some(Box::new(f));
        self.cover_sizes = sizes.to_vec();
        self
    }

    pub fn alternative_editions(
        mut self,
        f: impl Fn(&SearchContext, &str) -> Result<Vec<String>, SearchError> + Send + Sync + 'static,
    ) -> Self {
        self.alt_editions = Some(Box::new(f));
        self
    }

    pub fn view_by_external_id(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.view_url = Some(Box::new(f));
        self
    }

    /// Search with the ISBN-10 form whenever the code has one.
    pub fn prefer_isbn10(mut self) -> Self {
        self.prefers_isbn10 = true;
        self
    }

    pub fn id(&self) -> ProviderId {
        self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub fn is_available(&self) -> bool {
        self.descriptor.is_available()
    }

    pub fn capabilities(&self) -> Capabilities {
        let present = [
            (Capability::ByExternalId, self.by_external_id.is_some()),
            (Capability::ByIsbn, self.by_isbn.is_some()),
            (Capability::ByBarcode, self.by_barcode.is_some()),
            (Capability::ByText, self.by_text.is_some()),
            (Capability::CoverByIsbn, self.cover.is_some()),
            (Capability::AlternativeEditions, self.alt_editions.is_some()),
            (Capability::ViewByExternalId, self.view_url.is_some()),
        ];
        present
            .into_iter()
            .filter(|(_, p)| *p)
            .fold(Capabilities::empty(), |acc, (c, _)| acc.with(c))
    }

    pub fn supports(&self, cap: Capability) -> bool {
        self.capabilities().contains(cap)
    }

    /// First matching strategy in priority order: external id, ISBN,
    /// barcode, free text. `None` means this provider has nothing to do
    /// for these criteria.
    pub fn select_request(&self, criteria: &SearchCriteria, isbn: &Isbn) -> Option<SearchRequest> {
        if self.by_external_id.is_some() {
            if let Some(id) = criteria.external_id_for(self.id()) {
                return Some(SearchRequest::ExternalId(id.to_string()));
            }
        }
        if self.by_isbn.is_some() && isbn.is_valid(true) {
            let code = match isbn.to_isbn10() {
                Some(ten) if self.prefers_isbn10 => ten,
                _ => isbn.digits().to_string(),
            };
            return Some(SearchRequest::Isbn(code));
        }
        if self.by_barcode.is_some() && isbn.is_valid(false) {
            return Some(SearchRequest::Barcode(isbn.digits().to_string()));
        }
        if self.by_text.is_some() {
            return Some(SearchRequest::Text(TextQuery {
                author: criteria.author.trim().to_string(),
                title: criteria.title.trim().to_string(),
                publisher: criteria.publisher.trim().to_string(),
            }));
        }
        None
    }

    pub fn search(&self, ctx: &SearchContext, request: &SearchRequest) -> Result<Record, SearchError> {
        let (query, arg) = match request {
            SearchRequest::Text(q) => {
                return match &self.by_text {
                    Some(f) => f(ctx, q),
                    None => Err(self.unsupported(request)),
                };
            }
            SearchRequest::ExternalId(id) => (&self.by_external_id, id.as_str()),
            SearchRequest::Isbn(code) => (&self.by_isbn, code.as_str()),
            SearchRequest::Barcode(code) => (&self.by_barcode, code.as_str()),
        };
        match query {
            Some(f) => f(ctx, arg),
            None => Err(self.unsupported(request)),
        }
    }

    fn unsupported(&self, request: &SearchRequest) -> SearchError {
        SearchError::failure(self.id(), format!("{:?} not supported", request.capability()))
    }

    pub fn fetch_cover(
        &self,
        ctx: &SearchContext,
        isbn: &str,
        slot: CoverSlot,
        size: CoverSize,
    ) -> Result<Option<PathBuf>, SearchError> {
        match &self.cover {
            Some(f) => f(ctx, isbn, slot, size),
            None => Ok(None),
        }
    }

    /// Try the supported sizes from large to small until one yields a
    /// file. Errors only surface when every attempt failed with one.
    pub fn fetch_best_cover(
        &self,
        ctx: &SearchContext,
        isbn: &str,
        slot: CoverSlot,
    ) -> Result<Option<PathBuf>, SearchError> {
        if self.cover.is_none() {
            return Ok(None);
        }
        let sizes: Vec<CoverSize> = if self.cover_sizes.len() <= 1 {
            vec![self.cover_sizes.first().copied().unwrap_or(CoverSize::Large)]
        } else {
            CoverSize::PREFERENCE
                .into_iter()
                .filter(|s| self.cover_sizes.contains(s))
                .collect()
        };

        let mut last_err = None;
        let mut any_ok = false;
        for size in sizes {
            if ctx.is_cancelled() {
                break;
            }
            match self.fetch_cover(ctx, isbn, slot, size) {
                Ok(Some(path)) => return Ok(Some(path)),
                Ok(None) => any_ok = true,
                Err(e) => {
                    tracing::debug!("{} cover {:?} for {} failed: {}", self.name(), size, isbn, e);
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) if !any_ok => Err(e),
            _ => Ok(None),
        }
    }

    pub fn find_alternate_isbns(&self, ctx: &SearchContext, isbn: &str) -> Result<Vec<String>, SearchError> {
        match &self.alt_editions {
            Some(f) => f(ctx, isbn),
            None => Ok(Vec::new()),
        }
    }

    pub fn view_url(&self, external_id: &str) -> Option<String> {
        self.view_url.as_ref().map(|f| f(external_id))
    }
}

impl fmt::Debug for ProviderAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderAdapter")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("capabilities", &self.capabilities())
            .field("prefers_isbn10", &self.prefers_isbn10)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::record::FieldKey;

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor::new(7, "Test", &[], 1)
    }

    fn ok(_: &SearchContext, _: &str) -> Result<Record, SearchError> {
        Ok(Record::new())
    }

    fn full_adapter() -> ProviderAdapter {
        ProviderAdapter::new(descriptor())
            .by_external_id(ok)
            .by_isbn(ok)
            .by_barcode(ok)
            .by_text(|_, _| Ok(Record::new()))
    }

    #[test]
    fn external_id_has_priority() {
        let a = full_adapter();
        let c = SearchCriteria::default()
            .isbn("9780306406157")
            .external_id(ProviderId(7), "abc");
        let req = a.select_request(&c, &Isbn::parse(&c.isbn)).unwrap();
        assert_eq!(req, SearchRequest::ExternalId("abc".to_string()));
    }

    #[test]
    fn external_id_for_other_provider_is_ignored() {
        let a = full_adapter();
        let c = SearchCriteria::default().external_id(ProviderId(8), "abc").title("Dune");
        let req = a.select_request(&c, &Isbn::parse("")).unwrap();
        assert!(matches!(req, SearchRequest::Text(q) if q.title == "Dune"));
    }

    #[test]
    fn isbn_then_barcode_then_text() {
        let a = full_adapter();
        let c = SearchCriteria::default();
        assert_eq!(
            a.select_request(&c, &Isbn::parse("978-0-306-40615-7")),
            Some(SearchRequest::Isbn("9780306406157".to_string()))
        );
        assert_eq!(
            a.select_request(&c, &Isbn::parse("036000291452")),
            Some(SearchRequest::Barcode("036000291452".to_string()))
        );
        assert!(matches!(
            a.select_request(&c, &Isbn::parse("")),
            Some(SearchRequest::Text(_))
        ));
    }

    #[test]
    fn isbn10_preference() {
        let a = ProviderAdapter::new(descriptor()).by_isbn(ok).prefer_isbn10();
        let c = SearchCriteria::default();
        assert_eq!(
            a.select_request(&c, &Isbn::parse("9780306406157")),
            Some(SearchRequest::Isbn("0306406152".to_string()))
        );
        assert_eq!(
            a.select_request(&c, &Isbn::parse("9790000000001")),
            Some(SearchRequest::Isbn("9790000000001".to_string()))
        );
    }

    #[test]
    fn no_matching_strategy() {
        let a = ProviderAdapter::new(descriptor()).by_isbn(ok);
        let c = SearchCriteria::default().title("Dune");
        assert_eq!(a.select_request(&c, &Isbn::parse("")), None);
    }

    #[test]
    fn capabilities_follow_closures() {
        let a = ProviderAdapter::new(descriptor()).by_isbn(ok).view_by_external_id(|id| format!("https://x/{}", id));
        assert!(a.supports(Capability::ByIsbn));
        assert!(a.supports(Capability::ViewByExternalId));
        assert!(!a.supports(Capability::ByText));
        assert_eq!(a.view_url("42").as_deref(), Some("https://x/42"));
    }

    #[test]
    fn search_dispatches_to_matching_closure() {
        let a = ProviderAdapter::new(descriptor()).by_isbn(|_, code| Ok(Record::new().with(FieldKey::Isbn, code)));
        let ctx = SearchContext::new(a.id(), CancelToken::new());
        let r = a.search(&ctx, &SearchRequest::Isbn("123".into())).unwrap();
        assert_eq!(r.text(&FieldKey::Isbn), Some("123"));
        let err = a.search(&ctx, &SearchRequest::Barcode("123".into())).unwrap_err();
        assert!(matches!(err, SearchError::ProviderSearchFailure { .. }));
    }

    #[test]
    fn best_cover_falls_back_to_smaller_sizes() {
        let tried = Arc::new(Mutex::new(Vec::new()));
        let log = tried.clone();
        let a = ProviderAdapter::new(descriptor()).cover_by_isbn(
            &[CoverSize::Small, CoverSize::Large, CoverSize::Medium],
            move |_, _, _, size| {
                log.lock().unwrap().push(size);
                Ok((size == CoverSize::Small).then(|| PathBuf::from("/tmp/small.jpg")))
            },
        );
        let ctx = SearchContext::new(a.id(), CancelToken::new());
        let got = a.fetch_best_cover(&ctx, "9780306406157", CoverSlot::Front).unwrap();
        assert_eq!(got, Some(PathBuf::from("/tmp/small.jpg")));
        assert_eq!(
            *tried.lock().unwrap(),
            vec![CoverSize::Large, CoverSize::Medium, CoverSize::Small]
        );
    }

    #[test]
    fn single_size_means_single_attempt() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let a = ProviderAdapter::new(descriptor()).cover_by_isbn(&[CoverSize::Medium], move |_, _, _, size| {
            *counter.lock().unwrap() += 1;
            assert_eq!(size, CoverSize::Medium);
            Ok(None)
        });
        let ctx = SearchContext::new(a.id(), CancelToken::new());
        assert_eq!(a.fetch_best_cover(&ctx, "x", CoverSlot::Back).unwrap(), None);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn best_cover_error_when_all_attempts_fail() {
        let a = ProviderAdapter::new(descriptor()).cover_by_isbn(&[CoverSize::Large, CoverSize::Small], |ctx, _, _, _| {
            Err(SearchError::failure(ctx.provider(), "boom"))
        });
        let ctx = SearchContext::new(a.id(), CancelToken::new());
        assert!(a.fetch_best_cover(&ctx, "x", CoverSlot::Front).is_err());
    }
}
