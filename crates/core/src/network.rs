//! Connectivity check performed before a session starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// HEAD request against a well-known URL. Any HTTP answer, whatever the
/// status, counts as online.
///
/// [`Connectivity::is_online`] never waits for the network: it returns the
/// last probe result and starts a new probe on a background thread. Until
/// the first probe has answered the connection is assumed to be up.
#[derive(Debug, Clone)]
pub struct HttpConnectivity {
    state: Arc<ProbeState>,
}

#[derive(Debug)]
struct ProbeState {
    url: String,
    timeout: Duration,
    online: AtomicBool,
    probing: AtomicBool,
}

impl HttpConnectivity {
    /// Starts the first probe right away.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let connectivity = Self {
            state: Arc::new(ProbeState {
                url: url.into(),
                timeout,
                online: AtomicBool::new(true),
                probing: AtomicBool::new(false),
            }),
        };
        connectivity.refresh();
        connectivity
    }

    /// Start a background probe unless one is already in flight.
    pub fn refresh(&self) {
        if self.state.probing.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = self.state.clone();
        let spawned = std::thread::Builder::new()
            .name("connectivity-probe".into())
            .spawn(move || {
                state.probe();
                state.probing.store(false, Ordering::SeqCst);
            });
        if let Err(e) = spawned {
            tracing::warn!("Could not start connectivity probe: {}", e);
            self.state.probing.store(false, Ordering::SeqCst);
        }
    }

    /// Probe on the calling thread and wait for the answer.
    pub fn probe_now(&self) -> bool {
        self.state.probe()
    }
}

impl ProbeState {
    fn probe(&self) -> bool {
        let online = self.head();
        self.online.store(online, Ordering::SeqCst);
        online
    }

    fn head(&self) -> bool {
        let client = match reqwest::blocking::Client::builder()
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Could not build HTTP client: {}", e);
                return false;
            }
        };
        match client.head(&self.url).send() {
            Ok(_) => true,
            Err(e) => {
                tracing::info!("Connectivity probe to {} failed: {}", self.url, e);
                false
            }
        }
    }
}

impl Connectivity for HttpConnectivity {
    fn is_online(&self) -> bool {
        let online = self.state.online.load(Ordering::SeqCst);
        self.refresh();
        online
    }
}

/// Fixed answer, for tests and offline tooling.
#[derive(Debug, Clone, Copy)]
pub struct StaticConnectivity(pub bool);

impl Connectivity for StaticConnectivity {
    fn is_online(&self) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn reachable_server_is_online() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        let probe = HttpConnectivity::new(server.uri(), Duration::from_secs(5));
        let online = tokio::task::spawn_blocking(move || probe.probe_now()).await.unwrap();
        assert!(online);
    }

    #[test]
    fn unreachable_host_is_offline() {
        let probe = HttpConnectivity::new("http://127.0.0.1:9/", Duration::from_millis(500));
        assert!(!probe.probe_now());
        assert!(!probe.is_online());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_server_does_not_block_the_caller() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;
        let probe = HttpConnectivity::new(server.uri(), Duration::from_secs(10));

        let started = Instant::now();
        assert!(probe.is_online());
        assert!(probe.is_online());
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn static_answer() {
        assert!(StaticConnectivity(true).is_online());
        assert!(!StaticConnectivity(false).is_online());
    }
}
