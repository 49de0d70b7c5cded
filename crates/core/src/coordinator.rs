//! Search sessions: pick a strategy, run provider tasks, merge what they
//! return, and report through the event channels.
//!
//! Without an anchor (a valid ISBN or an external id) providers are queried
//! one at a time in the user's order until one of them reports an ISBN.
//! From then on, and from the start when an anchor was supplied, every
//! enabled provider is queried in parallel.
//!
//! All session state sits behind one mutex. Task callbacks arrive on worker
//! threads and are handled one at a time under that lock, as is
//! [`SearchCoordinator::cancel`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::accumulate::{Accumulator, MergeInput};
use crate::adapter::{ProviderAdapter, SearchRequest};
use crate::config::SearchConfig;
use crate::cover::{select_covers, CoverStorage, LocalCoverStorage};
use crate::criteria::SearchCriteria;
use crate::error::{SearchError, StorageError};
use crate::events::{self, EventSender, SearchEvents, SearchOutcome};
use crate::isbn::Isbn;
use crate::network::{Connectivity, HttpConnectivity, StaticConnectivity};
use crate::progress::{combine, TaskProgress};
use crate::provider::{Capability, ProviderId};
use crate::record::{FieldKey, Record};
use crate::registry::{ListType, SiteRegistry};
use crate::task::{SearchTask, TaskListener};

pub struct SearchCoordinatorBuilder {
    registry: Arc<SiteRegistry>,
    adapters: Vec<ProviderAdapter>,
    connectivity: Arc<dyn Connectivity>,
    storage: Arc<dyn CoverStorage>,
    accumulator: Accumulator,
}

impl SearchCoordinatorBuilder {
    pub fn adapter(mut self, adapter: ProviderAdapter) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn adapters(mut self, adapters: impl IntoIterator<Item = ProviderAdapter>) -> Self {
        self.adapters.extend(adapters);
        self
    }

    pub fn connectivity(mut self, connectivity: impl Connectivity + 'static) -> Self {
        self.connectivity = Arc::new(connectivity);
        self
    }

    /// Probe the configured URL before each session.
    pub fn config(self, config: &SearchConfig) -> Self {
        let probe = HttpConnectivity::new(config.connectivity_url.clone(), config.connect_timeout());
        self.connectivity(probe)
    }

    pub fn storage(mut self, storage: impl CoverStorage + 'static) -> Self {
        self.storage = Arc::new(storage);
        self
    }

    pub fn accumulator(mut self, accumulator: Accumulator) -> Self {
        self.accumulator = accumulator;
        self
    }

    pub fn build(self) -> (SearchCoordinator, SearchEvents) {
        let (sender, events) = events::channel();
        let mut adapters = BTreeMap::new();
        for adapter in self.adapters {
            let id = adapter.id();
            if self.registry.descriptor(id).is_none() {
                tracing::warn!("Adapter {} ({}) has no registry entry and will never be queried", id, adapter.name());
            }
            if adapters.insert(id, Arc::new(adapter)).is_some() {
                tracing::warn!("Duplicate adapter for provider {}, keeping the last one", id);
            }
        }
        let inner = Inner {
            registry: self.registry,
            adapters,
            connectivity: self.connectivity,
            storage: self.storage,
            accumulator: self.accumulator,
            events: sender,
            session: Mutex::new(Session::default()),
        };
        (SearchCoordinator { inner: Arc::new(inner) }, events)
    }
}

pub struct SearchCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<SiteRegistry>,
    adapters: BTreeMap<ProviderId, Arc<ProviderAdapter>>,
    connectivity: Arc<dyn Connectivity>,
    storage: Arc<dyn CoverStorage>,
    accumulator: Accumulator,
    events: EventSender,
    session: Mutex<Session>,
}

#[derive(Default)]
struct Session {
    criteria: SearchCriteria,
    /// Bumped for every session; callbacks carrying an older value are
    /// from tasks of a finished session and are dropped.
    generation: u64,
    run: Option<Run>,
}

/// State of the active session.
struct Run {
    criteria: SearchCriteria,
    isbn_text: String,
    isbn: Isbn,
    title_text: String,
    waiting_for_anchor: bool,
    cancelled: bool,
    /// Providers started in the current anchor epoch.
    queried: BTreeSet<ProviderId>,
    results: BTreeMap<ProviderId, Option<Record>>,
    errors: BTreeMap<ProviderId, SearchError>,
    /// Cover downloads that failed for providers whose search succeeded.
    cover_errors: Vec<(ProviderId, SearchError)>,
    progress: BTreeMap<ProviderId, TaskProgress>,
    running: BTreeMap<ProviderId, SearchTask>,
}

impl Run {
    fn new(criteria: SearchCriteria) -> Self {
        let isbn_text = criteria.isbn.trim().to_string();
        let isbn = Isbn::parse(&isbn_text);
        let anchored = criteria.has_external_ids() || isbn.is_valid(criteria.strict_isbn);
        Self {
            title_text: criteria.title.trim().to_string(),
            isbn_text,
            isbn,
            waiting_for_anchor: !anchored,
            cancelled: false,
            queried: BTreeSet::new(),
            results: BTreeMap::new(),
            errors: BTreeMap::new(),
            cover_errors: Vec::new(),
            progress: BTreeMap::new(),
            running: BTreeMap::new(),
            criteria,
        }
    }
}

impl SearchCoordinator {
    /// Start from the registry; adapters are added on the builder. The
    /// defaults assume a network is present and covers live on local disk.
    pub fn builder(registry: Arc<SiteRegistry>) -> SearchCoordinatorBuilder {
        SearchCoordinatorBuilder {
            registry,
            adapters: Vec::new(),
            connectivity: Arc::new(StaticConnectivity(true)),
            storage: Arc::new(LocalCoverStorage),
            accumulator: Accumulator::new(),
        }
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.inner.registry
    }

    pub fn adapter(&self, id: ProviderId) -> Option<&ProviderAdapter> {
        self.inner.adapters.get(&id).map(|a| a.as_ref())
    }

    /// Criteria for the next session. A running session keeps the
    /// criteria it was started with.
    pub fn set_criteria(&self, criteria: SearchCriteria) {
        self.inner.lock().criteria = criteria;
    }

    pub fn criteria(&self) -> SearchCriteria {
        self.inner.lock().criteria.clone()
    }

    pub fn is_search_active(&self) -> bool {
        self.inner.lock().run.is_some()
    }

    /// Start a session with the current criteria.
    ///
    /// Returns `Ok(true)` when at least one provider task was started. When
    /// none could be, no session is opened and no event will follow.
    pub fn search(&self) -> Result<bool, SearchError> {
        {
            let session = self.inner.lock();
            if session.run.is_some() {
                tracing::error!("search() called while a session is active");
                return Err(SearchError::ConcurrentSearchAlreadyRunning);
            }
            if !session.criteria.has_anchor_candidate() {
                tracing::error!("search() called without ISBN, external id, author or title");
                return Err(SearchError::MissingCriteria);
            }
        }
        self.check_network()?;

        let mut session = self.inner.lock();
        if session.run.is_some() {
            return Err(SearchError::ConcurrentSearchAlreadyRunning);
        }
        session.generation += 1;
        let generation = session.generation;
        let mut run = Run::new(session.criteria.clone());
        tracing::info!(
            "Search session {} started ({})",
            generation,
            if run.waiting_for_anchor { "serial" } else { "parallel" }
        );

        let started = if run.waiting_for_anchor {
            self.inner.start_next(&mut run, generation)
        } else {
            self.inner.start_all(&mut run, generation)
        };
        if started {
            session.run = Some(run);
        } else {
            tracing::info!("Search session {}: no provider could be queried", generation);
        }
        Ok(started)
    }

    /// Query a single provider for one of its own ids.
    ///
    /// `Ok(false)` when the provider cannot search by external id.
    pub fn search_by_external_id(&self, provider: ProviderId, external_id: &str) -> Result<bool, SearchError> {
        let adapter = self
            .inner
            .adapters
            .get(&provider)
            .cloned()
            .ok_or(SearchError::UnknownProvider(provider))?;
        if self.is_search_active() {
            tracing::error!("search_by_external_id() called while a session is active");
            return Err(SearchError::ConcurrentSearchAlreadyRunning);
        }
        if external_id.trim().is_empty() {
            return Err(SearchError::MissingCriteria);
        }
        if !adapter.supports(Capability::ByExternalId) {
            tracing::warn!("{} cannot search by external id", adapter.name());
            return Ok(false);
        }
        self.check_network()?;

        let mut session = self.inner.lock();
        if session.run.is_some() {
            return Err(SearchError::ConcurrentSearchAlreadyRunning);
        }
        session.generation += 1;
        let generation = session.generation;
        let criteria = SearchCriteria {
            fetch_covers: session.criteria.fetch_covers,
            ..SearchCriteria::default()
        }
        .external_id(provider, external_id.trim());
        let mut run = Run::new(criteria);

        let request = SearchRequest::ExternalId(external_id.trim().to_string());
        let started = self.inner.start_task(&mut run, generation, adapter, request);
        if started {
            session.run = Some(run);
        }
        Ok(started)
    }

    /// Ask every running task to stop. Idempotent; the cancelled event
    /// follows once a task reports back.
    pub fn cancel(&self) {
        let mut session = self.inner.lock();
        let Some(run) = session.run.as_mut() else {
            return;
        };
        if !run.cancelled {
            tracing::info!("Cancelling search, {} task(s) running", run.running.len());
        }
        run.cancelled = true;
        for task in run.running.values() {
            task.cancel();
        }
    }

    fn check_network(&self) -> Result<(), SearchError> {
        if self.inner.connectivity.is_online() {
            Ok(())
        } else {
            tracing::warn!("No network connection, search not started");
            Err(SearchError::NetworkUnavailable)
        }
    }
}

impl std::fmt::Debug for SearchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCoordinator")
            .field("adapters", &self.inner.adapters.keys().collect::<Vec<_>>())
            .field("active", &self.is_search_active())
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enabled data providers not yet queried in this epoch that have a
    /// strategy for the current criteria, in the user's order.
    fn candidates(&self, run: &Run) -> Vec<(Arc<ProviderAdapter>, SearchRequest)> {
        let mut out = Vec::new();
        for site in self.registry.enabled_for(ListType::Data) {
            if run.queried.contains(&site.provider) || run.running.contains_key(&site.provider) {
                continue;
            }
            let Some(adapter) = self.adapters.get(&site.provider) else {
                tracing::debug!("No adapter for enabled provider {}", site.provider);
                continue;
            };
            if !adapter.is_available() {
                tracing::debug!("{} is not available, skipped", adapter.name());
                continue;
            }
            match adapter.select_request(&run.criteria, &run.isbn) {
                Some(request) => out.push((adapter.clone(), request)),
                None => tracing::debug!("{}: nothing to search for", adapter.name()),
            }
        }
        out
    }

    fn start_all(self: &Arc<Self>, run: &mut Run, generation: u64) -> bool {
        let mut started = false;
        for (adapter, request) in self.candidates(run) {
            started |= self.start_task(run, generation, adapter, request);
        }
        started
    }

    fn start_next(self: &Arc<Self>, run: &mut Run, generation: u64) -> bool {
        for (adapter, request) in self.candidates(run) {
            if self.start_task(run, generation, adapter, request) {
                return true;
            }
        }
        false
    }

    fn start_task(
        self: &Arc<Self>,
        run: &mut Run,
        generation: u64,
        adapter: Arc<ProviderAdapter>,
        request: SearchRequest,
    ) -> bool {
        let id = adapter.id();
        let name = adapter.name().to_string();
        let task = SearchTask::new(adapter, request, run.criteria.fetch_covers);
        let listener: Arc<dyn TaskListener> = Arc::new(SessionListener {
            inner: self.clone(),
            generation,
        });

        run.queried.insert(id);
        run.cover_errors.retain(|(p, _)| *p != id);
        match task.start(listener) {
            Ok(()) => {
                tracing::debug!("Started {} with {:?}", name, task.request());
                run.progress.insert(id, TaskProgress::started(name));
                run.running.insert(id, task);
                true
            }
            Err(e) => {
                tracing::error!("Could not start search task for {}: {}", name, e);
                run.errors.insert(id, SearchError::failure(id, e.to_string()));
                false
            }
        }
    }

    fn on_progress(&self, generation: u64, provider: ProviderId, message: &str, position: u32, max: u32) {
        let mut session = self.lock();
        if session.generation != generation {
            return;
        }
        let Some(run) = session.run.as_mut() else {
            return;
        };
        let Some(entry) = run.progress.get_mut(&provider) else {
            return;
        };
        entry.message = message.to_string();
        entry.position = position;
        entry.max = max;
        self.events.progress(combine(&run.progress));
    }

    fn on_cover_error(&self, generation: u64, provider: ProviderId, error: SearchError) {
        let mut session = self.lock();
        if session.generation != generation {
            return;
        }
        if let Some(run) = session.run.as_mut() {
            if run.running.contains_key(&provider) {
                run.cover_errors.push((provider, error));
            }
        }
    }

    fn on_task_done(
        self: &Arc<Self>,
        generation: u64,
        provider: ProviderId,
        result: Option<Record>,
        error: Option<SearchError>,
    ) {
        let mut session = self.lock();
        if session.generation != generation {
            tracing::trace!("Dropping report of {} from an earlier session", provider);
            return;
        }
        let Some(run) = session.run.as_mut() else {
            return;
        };
        if run.running.remove(&provider).is_none() {
            return;
        }

        let found_isbn = result
            .as_ref()
            .and_then(|r| r.text(&FieldKey::Isbn))
            .map(|s| s.trim().to_string());
        run.results.insert(provider, result);
        match error {
            Some(e) => {
                run.errors.insert(provider, e);
            }
            None => {
                run.errors.remove(&provider);
            }
        }
        run.progress.remove(&provider);
        self.events.progress(combine(&run.progress));

        let mut started = false;
        if run.waiting_for_anchor && !run.cancelled {
            match found_isbn {
                Some(isbn) => {
                    tracing::info!("{} found ISBN {}, querying all providers", self.registry.name_of(provider), isbn);
                    run.waiting_for_anchor = false;
                    run.isbn = Isbn::parse(&isbn);
                    run.isbn_text = isbn;
                    run.queried.clear();
                    run.queried.insert(provider);
                    started = self.start_all(run, generation);
                }
                None => started = self.start_next(run, generation),
            }
        }

        if !started && (run.running.is_empty() || run.cancelled) {
            if let Some(run) = session.run.take() {
                self.finalize(run);
            }
        }
    }

    fn finalize(&self, run: Run) {
        for task in run.running.values() {
            task.cancel();
        }
        let order = self.registry.reliability_order();
        let mut record = self.accumulator.merge(&MergeInput {
            reliability_order: &order,
            results: &run.results,
            isbn_text: &run.isbn_text,
            strict_isbn: run.criteria.strict_isbn,
            title_text: &run.title_text,
        });
        let storage_errors = select_covers(self.storage.as_ref(), &mut record);
        let outcome = SearchOutcome {
            record,
            errors: error_summary(&self.registry, &run.errors, &run.cover_errors, storage_errors),
        };

        if run.cancelled {
            tracing::info!("Search cancelled with {} provider result(s)", run.results.len());
            self.events.cancelled(outcome);
        } else {
            tracing::info!("Search finished with {} provider result(s)", run.results.len());
            self.events.finished(outcome);
        }
    }
}

/// One line per failed provider, in id order, then one per failed cover
/// download, then one per storage problem.
fn error_summary(
    registry: &SiteRegistry,
    errors: &BTreeMap<ProviderId, SearchError>,
    cover_errors: &[(ProviderId, SearchError)],
    storage_errors: Vec<StorageError>,
) -> Option<String> {
    let mut lines: Vec<String> = errors
        .iter()
        .chain(cover_errors.iter().map(|(id, e)| (id, e)))
        .map(|(id, e)| format!("{}: {}", registry.name_of(*id), e))
        .collect();
    lines.extend(storage_errors.into_iter().map(|e| SearchError::Storage(e).to_string()));
    (!lines.is_empty()).then(|| lines.join("\n"))
}

struct SessionListener {
    inner: Arc<Inner>,
    generation: u64,
}

impl TaskListener for SessionListener {
    fn on_progress(&self, provider: ProviderId, message: &str, position: u32, max: u32) {
        self.inner.on_progress(self.generation, provider, message, position, max);
    }

    fn on_cover_error(&self, provider: ProviderId, error: SearchError) {
        self.inner.on_cover_error(self.generation, provider, error);
    }

    fn on_finished(&self, provider: ProviderId, result: Record) {
        self.inner.on_task_done(self.generation, provider, Some(result), None);
    }

    fn on_cancelled(&self, provider: ProviderId, partial: Option<Record>) {
        self.inner.on_task_done(self.generation, provider, partial, None);
    }

    fn on_failure(&self, provider: ProviderId, error: SearchError) {
        self.inner.on_task_done(self.generation, provider, None, Some(error));
    }
}
