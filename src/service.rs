//! Lazily built, resettable API client handles.
//!
//! A [`ServiceHandle`] owns the credentials and the authenticated client of
//! one integration (Drive, Gmail or Sheets). The client is built on the first
//! [`get_service`](ServiceHandle::get_service) call, shared by every caller
//! until [`reset`](ServiceHandle::reset) drops it, and rebuilt transparently
//! on the next use.
//!
//! The handle's mutex only guards building and resetting the client; requests
//! issued with the returned client run concurrently.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info};

use crate::auth::{Credentials, ServiceAccountKey, TokenSource};
use crate::config::ServiceConfig;
use crate::error::{GapiError, Result};
use crate::retry::{DEFAULT_LOGGER, RetryExecutor, RetryPolicy};
use crate::runtime::Runtime;

/// Builds the client of one Google API from authorized credentials.
pub trait Connector: Send + Sync {
    type Client: Send + Sync;

    /// Short API name used in log messages.
    fn name(&self) -> &'static str;

    /// OAuth scopes requested for this API.
    fn scopes(&self) -> &'static [&'static str];

    fn connect<R: Runtime>(
        &self,
        credentials: &Credentials,
        config: &ServiceConfig,
        runtime: &R,
    ) -> Result<Self::Client>;
}

/// Lifecycle of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// `configure` was never called.
    Unconfigured,
    /// Configured, no client built (initially or after `reset`).
    Idle,
    /// A client is cached.
    Ready,
}

struct Session<T> {
    credentials: Credentials,
    client: Arc<T>,
}

pub struct ServiceHandle<C: Connector, R: Runtime> {
    connector: Arc<C>,
    runtime: Arc<R>,
    tokens: Arc<dyn TokenSource>,
    config: Arc<RwLock<Option<ServiceConfig>>>,
    subject: Option<String>,
    session: Mutex<Option<Session<C::Client>>>,
}

impl<C: Connector, R: Runtime> ServiceHandle<C, R> {
    /// Creates an unconfigured, non-delegated handle.
    pub fn new(connector: C, runtime: R, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            connector: Arc::new(connector),
            runtime: Arc::new(runtime),
            tokens,
            config: Arc::new(RwLock::new(None)),
            subject: None,
            session: Mutex::new(None),
        }
    }

    /// Returns a handle acting on behalf of `user`.
    ///
    /// The new handle shares this handle's configuration (later `configure`
    /// calls affect both) but builds and resets its own client.
    pub fn for_user(&self, user: impl Into<String>) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            runtime: Arc::clone(&self.runtime),
            tokens: Arc::clone(&self.tokens),
            config: Arc::clone(&self.config),
            subject: Some(user.into()),
            session: Mutex::new(None),
        }
    }

    /// Sets the configuration. The last call wins; an already built client
    /// keeps its old settings until the next `reset`.
    pub fn configure(&self, config: ServiceConfig) {
        debug!(api = self.connector.name(), "Configuring service with {:?}", config.key_file);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Some(config);
    }

    pub fn config(&self) -> Result<ServiceConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(GapiError::not_configured)
    }

    pub fn is_configured(&self) -> bool {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn state(&self) -> HandleState {
        if !self.is_configured() {
            return HandleState::Unconfigured;
        }
        if self.lock_session().is_some() {
            HandleState::Ready
        } else {
            HandleState::Idle
        }
    }

    /// Logger namespace from the configuration, or the default one.
    pub fn logger(&self) -> String {
        self.config()
            .map(|c| c.logger)
            .unwrap_or_else(|_| DEFAULT_LOGGER.to_string())
    }

    /// Delegated user, if any.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Session<C::Client>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached client, building it first if needed.
    #[tracing::instrument(skip(self), fields(api = self.connector.name()))]
    pub fn get_service(&self) -> Result<Arc<C::Client>> {
        let mut session = self.lock_session();
        if let Some(existing) = session.as_ref() {
            return Ok(Arc::clone(&existing.client));
        }

        let config = self.config()?;
        let key = ServiceAccountKey::from_file(&*self.runtime, &config.key_file)?;
        let credentials = Credentials::authorize(
            key,
            self.connector.scopes(),
            self.subject.as_deref(),
            &*self.tokens,
        )?;
        let client = Arc::new(
            self.connector
                .connect(&credentials, &config, &*self.runtime)?,
        );

        info!(
            logger = %config.logger,
            "Connected to {} API as {}{}",
            self.connector.name(),
            credentials.key.client_email,
            self.subject
                .as_deref()
                .map(|s| format!(" on behalf of {}", s))
                .unwrap_or_default()
        );

        *session = Some(Session {
            credentials,
            client: Arc::clone(&client),
        });
        Ok(client)
    }

    /// Credentials of the cached client, building it first if needed.
    pub fn credentials(&self) -> Result<Credentials> {
        self.get_service()?;
        self.lock_session()
            .as_ref()
            .map(|s| s.credentials.clone())
            .ok_or_else(|| GapiError::Unexpected("service was reset concurrently".to_string()))
    }

    /// Drops the cached client and credentials. Safe to call repeatedly.
    pub fn reset(&self) {
        if self.lock_session().take().is_some() {
            debug!(api = self.connector.name(), "Service reset");
        }
    }

    /// Runs `operation` against the client under the configured retry
    /// policy, resetting the handle before each retry.
    pub fn call<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnMut(&C::Client) -> Result<T>,
    {
        let policy = self.config()?.retry;
        self.call_with_policy(policy, operation)
    }

    /// Like [`call`](Self::call) with an explicit policy.
    pub fn call_with_policy<T, F>(&self, policy: RetryPolicy, mut operation: F) -> Result<T>
    where
        F: FnMut(&C::Client) -> Result<T>,
    {
        let logger = self.config()?.logger;
        RetryExecutor::new(&*self.runtime, policy)
            .with_logger(&logger)
            .run_with_recovery(
                || {
                    let client = self.get_service()?;
                    operation(&client)
                },
                GapiError::class,
                || self.reset(),
            )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::StaticTokenSource;
    use crate::auth::tests::KEY_JSON;
    use crate::runtime::MockRuntime;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex as StdMutex};
    use std::time::Duration;

    #[derive(Debug)]
    pub(crate) struct FakeClient {
        pub serial: usize,
        pub subject: Option<String>,
        pub token: String,
    }

    #[derive(Default)]
    pub(crate) struct CountingConnector {
        pub builds: AtomicUsize,
        pub build_delay: Option<Duration>,
        pub failures: StdMutex<Vec<GapiError>>,
    }

    impl Connector for CountingConnector {
        type Client = FakeClient;

        fn name(&self) -> &'static str {
            "fake"
        }

        fn scopes(&self) -> &'static [&'static str] {
            &["https://www.googleapis.com/auth/fake"]
        }

        fn connect<R: Runtime>(
            &self,
            credentials: &Credentials,
            _config: &ServiceConfig,
            _runtime: &R,
        ) -> Result<FakeClient> {
            if let Some(delay) = self.build_delay {
                std::thread::sleep(delay);
            }
            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }
            let serial = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(FakeClient {
                serial,
                subject: credentials.subject.clone(),
                token: credentials.access_token().to_string(),
            })
        }
    }

    pub(crate) fn key_runtime() -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_read_to_string()
            .returning(|_| Ok(KEY_JSON.to_string()));
        runtime.expect_sleep().return_const(());
        runtime
    }

    fn handle(connector: CountingConnector) -> ServiceHandle<CountingConnector, MockRuntime> {
        ServiceHandle::new(
            connector,
            key_runtime(),
            Arc::new(StaticTokenSource("tok".to_string())),
        )
    }

    fn configured(connector: CountingConnector) -> ServiceHandle<CountingConnector, MockRuntime> {
        let handle = handle(connector);
        handle.configure(ServiceConfig::new("/keys/sa.json").with_retry_delay(0.0));
        handle
    }

    #[test]
    fn test_get_service_before_configure_fails() {
        let handle = handle(CountingConnector::default());
        assert_eq!(handle.state(), HandleState::Unconfigured);

        let err = handle.get_service().unwrap_err();
        assert!(matches!(err, GapiError::NotConfigured(_)));
        assert_eq!(err.to_string(), "Service is not configured");
        assert_eq!(handle.connector().builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_get_service_builds_once_and_caches() {
        let handle = configured(CountingConnector::default());
        assert_eq!(handle.state(), HandleState::Idle);

        let first = handle.get_service().unwrap();
        let second = handle.get_service().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.token, "tok");
        assert_eq!(handle.state(), HandleState::Ready);
        assert_eq!(handle.connector().builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_is_idempotent_and_rebuilds_once() {
        let handle = configured(CountingConnector::default());
        let first = handle.get_service().unwrap();

        handle.reset();
        handle.reset();
        handle.reset();
        assert_eq!(handle.state(), HandleState::Idle);

        let second = handle.get_service().unwrap();
        let third = handle.get_service().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(second.serial, 2);
        assert_eq!(handle.connector().builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reset_on_idle_handle_is_noop() {
        let handle = configured(CountingConnector::default());
        handle.reset();
        assert_eq!(handle.state(), HandleState::Idle);
    }

    #[test]
    fn test_concurrent_get_service_builds_single_client() {
        let handle = configured(CountingConnector {
            build_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });

        const THREADS: usize = 8;
        let barrier = Barrier::new(THREADS);
        let clients: Vec<Arc<FakeClient>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        handle.get_service().unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(handle.connector().builds.load(Ordering::SeqCst), 1);
        for client in &clients {
            assert!(Arc::ptr_eq(client, &clients[0]));
        }
    }

    #[test]
    fn test_delegated_handle_has_own_session() {
        let handle = configured(CountingConnector::default());
        let delegated = handle.for_user("alice@example.com");

        let default_client = handle.get_service().unwrap();
        let delegated_client = delegated.get_service().unwrap();

        assert_eq!(default_client.subject, None);
        assert_eq!(delegated_client.subject.as_deref(), Some("alice@example.com"));
        assert_eq!(delegated.subject(), Some("alice@example.com"));

        delegated.reset();
        assert_eq!(delegated.state(), HandleState::Idle);
        assert_eq!(handle.state(), HandleState::Ready);
    }

    #[test]
    fn test_delegated_handle_shares_configuration() {
        let handle = handle(CountingConnector::default());
        let delegated = handle.for_user("bob@example.com");
        assert!(delegated.get_service().is_err());

        handle.configure(ServiceConfig::new("/keys/sa.json"));
        assert!(delegated.is_configured());
        assert!(delegated.get_service().is_ok());
    }

    #[test]
    fn test_configure_last_write_wins() {
        let handle = configured(CountingConnector::default());
        handle.configure(ServiceConfig::new("/keys/other.json").with_logger("other"));
        let config = handle.config().unwrap();
        assert_eq!(config.logger, "other");
        assert_eq!(config.key_file, std::path::PathBuf::from("/keys/other.json"));
    }

    #[test]
    fn test_credentials_are_exposed() {
        let handle = configured(CountingConnector::default());
        let credentials = handle.credentials().unwrap();
        assert_eq!(credentials.bearer(), "Bearer tok");
        assert_eq!(credentials.scopes, vec!["https://www.googleapis.com/auth/fake"]);
    }

    #[test]
    fn test_failed_construction_leaves_handle_idle() {
        let connector = CountingConnector::default();
        connector
            .failures
            .lock()
            .unwrap()
            .push(GapiError::Network("unreachable".to_string()));
        let handle = configured(connector);

        assert!(handle.get_service().is_err());
        assert_eq!(handle.state(), HandleState::Idle);
        assert!(handle.get_service().is_ok());
    }

    #[test]
    fn test_call_resets_handle_between_retries() {
        let handle = configured(CountingConnector::default());
        let attempts = Cell::new(0);

        let serial = handle
            .call(|client| {
                attempts.set(attempts.get() + 1);
                if attempts.get() < 3 {
                    Err(GapiError::Http {
                        status: 500,
                        message: "backend error".to_string(),
                    })
                } else {
                    Ok(client.serial)
                }
            })
            .unwrap();

        // each retry starts from a freshly built client
        assert_eq!(serial, 3);
        assert_eq!(handle.connector().builds.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_call_does_not_reset_on_fatal_error() {
        let handle = configured(CountingConnector::default());

        let err = handle
            .call(|_| -> Result<()> {
                Err(GapiError::Http {
                    status: 403,
                    message: "insufficient permissions".to_string(),
                })
            })
            .unwrap_err();

        assert_eq!(err.status(), Some(403));
        assert_eq!(handle.state(), HandleState::Ready);
        assert_eq!(handle.connector().builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_call_on_unconfigured_handle_is_fatal() {
        let handle = handle(CountingConnector::default());
        let calls = Cell::new(0);
        let err = handle
            .call_with_policy(RetryPolicy::new(5, 0.0), |_| {
                calls.set(calls.get() + 1);
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, GapiError::NotConfigured(_)));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_call_exhausts_with_original_error() {
        let handle = configured(CountingConnector::default());
        handle.configure(
            ServiceConfig::new("/keys/sa.json").with_retry(RetryPolicy::new(2, 0.0)),
        );
        let attempts = Cell::new(0);

        let err = handle
            .call(|_| -> Result<()> {
                attempts.set(attempts.get() + 1);
                Err(GapiError::Network("connection reset".to_string()))
            })
            .unwrap_err();

        assert!(matches!(err, GapiError::Network(_)));
        assert_eq!(attempts.get(), 3);
    }
}
