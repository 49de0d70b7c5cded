//! One in-flight query against one provider adapter, on its own thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::adapter::{ProviderAdapter, SearchContext, SearchRequest};
use crate::error::SearchError;
use crate::isbn::Isbn;
use crate::provider::{Capability, ProviderId};
use crate::record::{CoverSlot, FieldKey, Record};

/// Shared cooperative cancel flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Running = 1,
    Finished = 2,
    Cancelled = 3,
    Failed = 4,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Finished,
            3 => TaskState::Cancelled,
            _ => TaskState::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Cancelled | TaskState::Failed)
    }
}

/// Receives task reports. Progress and cover errors may arrive any number
/// of times, then exactly one of finished, cancelled, or failure. Calls
/// come from the task's worker thread.
pub trait TaskListener: Send + Sync {
    fn on_progress(&self, provider: ProviderId, message: &str, position: u32, max: u32);
    /// A cover download failed after the search itself succeeded. The
    /// task carries on and still reports its record.
    fn on_cover_error(&self, provider: ProviderId, error: SearchError);
    fn on_finished(&self, provider: ProviderId, result: Record);
    fn on_cancelled(&self, provider: ProviderId, partial: Option<Record>);
    fn on_failure(&self, provider: ProviderId, error: SearchError);
}

pub struct SearchTask {
    adapter: Arc<ProviderAdapter>,
    request: SearchRequest,
    fetch_covers: [bool; 2],
    cancel: CancelToken,
    state: Arc<AtomicU8>,
}

impl SearchTask {
    pub fn new(adapter: Arc<ProviderAdapter>, request: SearchRequest, fetch_covers: [bool; 2]) -> Self {
        Self {
            adapter,
            request,
            fetch_covers,
            cancel: CancelToken::new(),
            state: Arc::new(AtomicU8::new(TaskState::Pending as u8)),
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.adapter.id()
    }

    pub fn request(&self) -> &SearchRequest {
        &self.request
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Only sets the flag; the adapter notices at its next check.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the query on a new worker thread. Fails only if the thread
    /// could not be spawned, in which case no callback will ever fire.
    pub fn start(&self, listener: Arc<dyn TaskListener>) -> std::io::Result<()> {
        let adapter = self.adapter.clone();
        let request = self.request.clone();
        let fetch_covers = self.fetch_covers;
        let cancel = self.cancel.clone();
        let state = self.state.clone();

        state.store(TaskState::Running as u8, Ordering::SeqCst);
        let spawned = std::thread::Builder::new()
            .name(format!("search-{}", adapter.id()))
            .spawn(move || run(adapter, request, fetch_covers, cancel, state, listener));
        if spawned.is_err() {
            self.state.store(TaskState::Failed as u8, Ordering::SeqCst);
        }
        spawned.map(|_| ())
    }
}

impl std::fmt::Debug for SearchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchTask")
            .field("provider", &self.provider())
            .field("request", &self.request)
            .field("state", &self.state())
            .finish()
    }
}

fn run(
    adapter: Arc<ProviderAdapter>,
    request: SearchRequest,
    fetch_covers: [bool; 2],
    cancel: CancelToken,
    state: Arc<AtomicU8>,
    listener: Arc<dyn TaskListener>,
) {
    let provider = adapter.id();
    let ctx = SearchContext::new(provider, cancel.clone()).with_listener(listener.clone());
    let finish = |s: TaskState| state.store(s as u8, Ordering::SeqCst);

    if cancel.is_cancelled() {
        finish(TaskState::Cancelled);
        listener.on_cancelled(provider, None);
        return;
    }

    tracing::debug!("{} starting {:?}", adapter.name(), request);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut record = adapter.search(&ctx, &request)?;
        if !cancel.is_cancelled() {
            for e in fetch_missing_covers(&adapter, &ctx, &request, fetch_covers, &mut record) {
                listener.on_cover_error(provider, e);
            }
        }
        Ok::<Record, SearchError>(record)
    }))
    .unwrap_or_else(|_| Err(SearchError::failure(provider, "provider adapter panicked")));

    match (outcome, cancel.is_cancelled()) {
        (Ok(record), false) => {
            finish(TaskState::Finished);
            listener.on_finished(provider, record);
        }
        (Ok(record), true) => {
            finish(TaskState::Cancelled);
            listener.on_cancelled(provider, Some(record));
        }
        (Err(_), true) => {
            finish(TaskState::Cancelled);
            listener.on_cancelled(provider, None);
        }
        (Err(e), false) => {
            tracing::warn!("{} search failed: {}", adapter.name(), e);
            finish(TaskState::Failed);
            listener.on_failure(provider, e);
        }
    }
}

/// Fill requested cover slots the search itself left empty. Returns the
/// download failures; they never fail the task.
fn fetch_missing_covers(
    adapter: &ProviderAdapter,
    ctx: &SearchContext,
    request: &SearchRequest,
    fetch_covers: [bool; 2],
    record: &mut Record,
) -> Vec<SearchError> {
    let mut errors = Vec::new();
    if !adapter.supports(Capability::CoverByIsbn) {
        return errors;
    }
    let isbn = record
        .text(&FieldKey::Isbn)
        .map(Isbn::parse)
        .filter(|i| i.is_valid(false))
        .or_else(|| request.code().map(Isbn::parse).filter(|i| i.is_valid(false)));
    let Some(isbn) = isbn else {
        return errors;
    };

    for slot in CoverSlot::ALL {
        if !fetch_covers[slot.index()] || !record.cover_candidates(slot).is_empty() || ctx.is_cancelled() {
            continue;
        }
        match adapter.fetch_best_cover(ctx, isbn.digits(), slot) {
            Ok(Some(path)) => record.add_cover_candidate(slot, path),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("{} cover download failed: {}", adapter.name(), e);
                errors.push(e);
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::adapter::CoverSize;
    use crate::provider::ProviderDescriptor;

    #[derive(Debug)]
    enum Report {
        Progress(String),
        CoverError(String),
        Finished(Record),
        Cancelled(Option<Record>),
        Failure(String),
    }

    struct ChannelListener(std::sync::Mutex<mpsc::Sender<Report>>);

    impl TaskListener for ChannelListener {
        fn on_progress(&self, _: ProviderId, message: &str, _: u32, _: u32) {
            let _ = self.0.lock().unwrap().send(Report::Progress(message.to_string()));
        }
        fn on_cover_error(&self, _: ProviderId, error: SearchError) {
            let _ = self.0.lock().unwrap().send(Report::CoverError(error.to_string()));
        }
        fn on_finished(&self, _: ProviderId, result: Record) {
            let _ = self.0.lock().unwrap().send(Report::Finished(result));
        }
        fn on_cancelled(&self, _: ProviderId, partial: Option<Record>) {
            let _ = self.0.lock().unwrap().send(Report::Cancelled(partial));
        }
        fn on_failure(&self, _: ProviderId, error: SearchError) {
            let _ = self.0.lock().unwrap().send(Report::Failure(error.to_string()));
        }
    }

    fn listener() -> (Arc<dyn TaskListener>, mpsc::Receiver<Report>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(ChannelListener(std::sync::Mutex::new(tx))), rx)
    }

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor::new(1, "Test", &[], 1)
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn reports_progress_then_finished() {
        let adapter = ProviderAdapter::new(descriptor()).by_isbn(|ctx, code| {
            ctx.progress("fetching", 1, 2);
            Ok(Record::new().with(FieldKey::Isbn, code))
        });
        let task = SearchTask::new(Arc::new(adapter), SearchRequest::Isbn("9780306406157".into()), [false; 2]);
        let (l, rx) = listener();
        task.start(l).unwrap();

        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Report::Progress(m) if m == "fetching"));
        match rx.recv_timeout(WAIT).unwrap() {
            Report::Finished(r) => assert_eq!(r.text(&FieldKey::Isbn), Some("9780306406157")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(task.state(), TaskState::Finished);
    }

    #[test]
    fn failure_is_reported() {
        let adapter = ProviderAdapter::new(descriptor())
            .by_isbn(|ctx, _| Err(SearchError::CredentialsRequired { provider: ctx.provider() }));
        let task = SearchTask::new(Arc::new(adapter), SearchRequest::Isbn("x".into()), [false; 2]);
        let (l, rx) = listener();
        task.start(l).unwrap();
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Report::Failure(_)));
        assert_eq!(task.state(), TaskState::Failed);
    }

    #[test]
    fn panicking_adapter_becomes_failure() {
        let adapter = ProviderAdapter::new(descriptor()).by_isbn(|_, _| panic!("broken adapter"));
        let task = SearchTask::new(Arc::new(adapter), SearchRequest::Isbn("x".into()), [false; 2]);
        let (l, rx) = listener();
        task.start(l).unwrap();
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Report::Failure(m) if m.contains("panicked")));
    }

    #[test]
    fn cancel_delivers_partial_result() {
        let adapter = ProviderAdapter::new(descriptor()).by_text(|ctx, q| {
            let partial = Record::new().with(FieldKey::Title, q.title.as_str());
            while !ctx.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(partial)
        });
        let task = SearchTask::new(
            Arc::new(adapter),
            SearchRequest::Text(crate::adapter::TextQuery {
                title: "Dune".into(),
                ..Default::default()
            }),
            [false; 2],
        );
        let (l, rx) = listener();
        task.start(l).unwrap();
        task.cancel();
        match rx.recv_timeout(WAIT).unwrap() {
            Report::Cancelled(Some(r)) => assert_eq!(r.text(&FieldKey::Title), Some("Dune")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(task.state(), TaskState::Cancelled);
    }

    #[test]
    fn missing_cover_fetched_after_search() {
        let adapter = ProviderAdapter::new(descriptor())
            .by_isbn(|_, _| Ok(Record::new().with(FieldKey::Title, "Dune")))
            .cover_by_isbn(&[CoverSize::Large], |_, isbn, slot, _| {
                Ok(Some(PathBuf::from(format!("/tmp/{}_{}.jpg", isbn, slot.index()))))
            });
        let task = SearchTask::new(Arc::new(adapter), SearchRequest::Isbn("9780306406157".into()), [true, false]);
        let (l, rx) = listener();
        task.start(l).unwrap();
        match rx.recv_timeout(WAIT).unwrap() {
            Report::Finished(r) => {
                assert_eq!(
                    r.cover_candidates(CoverSlot::Front),
                    vec![PathBuf::from("/tmp/9780306406157_0.jpg")]
                );
                assert!(r.cover_candidates(CoverSlot::Back).is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cover_failure_is_reported_and_task_still_finishes() {
        let adapter = ProviderAdapter::new(descriptor())
            .by_isbn(|_, code| Ok(Record::new().with(FieldKey::Isbn, code)))
            .cover_by_isbn(&[CoverSize::Large], |_, _, _, _| {
                Err(SearchError::Storage(crate::error::StorageError::Io(std::io::Error::other("disk full"))))
            });
        let task = SearchTask::new(Arc::new(adapter), SearchRequest::Isbn("9780306406157".into()), [true, false]);
        let (l, rx) = listener();
        task.start(l).unwrap();
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Report::CoverError(m) if m.contains("disk full")));
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Report::Finished(_)));
        assert_eq!(task.state(), TaskState::Finished);
    }
}
