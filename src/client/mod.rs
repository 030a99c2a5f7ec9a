//! Clients dialing resolved targets.

use crate::{
    resolver::{BuildOptions, ClientConn, Registry, Resolver},
    Address, AddressSet, Error, Target,
};
use arc_swap::ArcSwap;
use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};

#[cfg(feature = "serde")]
mod config;
#[cfg(feature = "serde")]
pub use config::ClientConfig;

/// Computes the pause before call retry `attempt` (starting at 1).
pub type RetryBackoff = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Errors encountered by [`Client::execute`].
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E: Debug> {
    /// The client currently knows no address to call
    #[error("no addresses to call")]
    NoAddresses,
    /// Every attempt failed; this is the last failure
    #[error("call failed after {attempts} attempts")]
    Call {
        /// Number of attempts made.
        attempts: u32,
        /// Error of the last attempt.
        #[source]
        last: E,
    },
}

/// Options of a [`Client`].
///
/// A client dials either a literal [`target`](ClientOptions::target) or, when
/// both a [`scheme`](ClientOptions::scheme) and an
/// [`endpoint`](ClientOptions::endpoint) are set,
/// `scheme://authority/endpoint`.
#[derive(Clone)]
pub struct ClientOptions {
    target: String,
    scheme: String,
    authority: String,
    endpoint: String,
    proxy_address: String,
    timeout: Duration,
    retry_max: u32,
    retry_backoff: RetryBackoff,
    block: bool,
}

impl Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("target", &self.target)
            .field("scheme", &self.scheme)
            .field("authority", &self.authority)
            .field("endpoint", &self.endpoint)
            .field("proxy_address", &self.proxy_address)
            .field("timeout", &self.timeout)
            .field("retry_max", &self.retry_max)
            .field("block", &self.block)
            .finish_non_exhaustive()
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            target: String::new(),
            scheme: String::new(),
            authority: String::new(),
            endpoint: String::new(),
            proxy_address: String::new(),
            timeout: Duration::from_secs(3),
            retry_max: 3,
            retry_backoff: Arc::new(|_: u32| Duration::from_micros(100)),
            block: false,
        }
    }
}

impl ClientOptions {
    /// Options with every setting at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the literal target, e.g. `10.0.0.1:9000` or `dns:///billing:9000`.
    pub fn target(self, target: impl ToString) -> Self {
        Self {
            target: target.to_string(),
            ..self
        }
    }

    /// Sets the resolver scheme, e.g. `consul`.
    pub fn scheme(self, scheme: impl ToString) -> Self {
        Self {
            scheme: scheme.to_string(),
            ..self
        }
    }

    /// Sets the authority, e.g. the registry address.
    pub fn authority(self, authority: impl ToString) -> Self {
        Self {
            authority: authority.to_string(),
            ..self
        }
    }

    /// Sets the logical endpoint, e.g. `billing?dc=dc1`.
    pub fn endpoint(self, endpoint: impl ToString) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..self
        }
    }

    /// Sets the proxy to fall back to when discovery finds nothing.
    ///
    /// Only schemes whose builder supports a fallback proxy (`dns`) accept
    /// one; for any other scheme [`Client::connect`] fails with
    /// [`Error::FallbackUnsupported`] rather than ignoring the proxy.
    pub fn proxy_address(self, proxy_address: impl ToString) -> Self {
        Self {
            proxy_address: proxy_address.to_string(),
            ..self
        }
    }

    /// Sets how long a blocking dial may take.
    pub fn timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Sets how many times a failed call is retried.
    pub fn retry_max(self, retry_max: u32) -> Self {
        Self { retry_max, ..self }
    }

    /// Sets the pause before each call retry.
    pub fn retry_backoff(self, backoff: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            retry_backoff: Arc::new(backoff),
            ..self
        }
    }

    /// Makes dialing wait, for at most the timeout, until the target has
    /// been resolved.
    pub fn block(self) -> Self {
        Self {
            block: true,
            ..self
        }
    }

    /// The target the client will dial.
    pub fn target_string(&self) -> Result<String, Error> {
        if !self.scheme.is_empty() && !self.endpoint.is_empty() {
            return Ok(format!(
                "{}://{}/{}",
                self.scheme, self.authority, self.endpoint
            ));
        }
        if self.target.is_empty() {
            return Err(Error::MissingTarget);
        }
        Ok(self.target.clone())
    }
}

/// Latest address set of a client, updated by its resolver.
#[derive(Debug, Default)]
pub struct AddressBook {
    addresses: ArcSwap<AddressSet>,
}

impl AddressBook {
    /// Snapshot of the current addresses.
    pub fn load(&self) -> Arc<AddressSet> {
        self.addresses.load_full()
    }
}

impl ClientConn for AddressBook {
    fn update_state(&self, addresses: AddressSet) {
        self.addresses.store(Arc::new(addresses));
    }
}

/// Client for a resolved target.
///
/// # Usage
///
/// [`Client::connect`] selects the target from [`ClientOptions`], builds a
/// resolver for it from a [`Registry`] and waits for the first resolution.
/// Calls are then made with [`Client::execute`], which hands the closure
/// addresses from the live set and retries failures on the next address.
pub struct Client {
    target: String,
    resolver: Box<dyn Resolver>,
    addresses: Arc<AddressBook>,
    retry_max: u32,
    retry_backoff: RetryBackoff,
}

impl Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("target", &self.target)
            .field("addresses", &self.addresses)
            .field("retry_max", &self.retry_max)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Dials the target described by `options`.
    ///
    /// Fails if no target is configured, its scheme isn't registered, or its
    /// first resolution fails. If a proxy address is set, it is installed as
    /// the fallback of the scheme's builder first.
    pub async fn connect(registry: &Registry, options: ClientOptions) -> Result<Self, Error> {
        let target = options.target_string()?;
        if !options.proxy_address.is_empty() {
            let scheme = Target::parse(&target).scheme;
            registry.register_fallback_proxy(&scheme, &options.proxy_address)?;
        }

        let addresses = Arc::new(AddressBook::default());
        let build = registry.build(&target, addresses.clone(), BuildOptions::default());
        let resolver = if options.block {
            tokio::time::timeout(options.timeout, build)
                .await
                .map_err(|_| Error::DialTimeout(options.timeout))??
        } else {
            build.await?
        };
        #[cfg(feature = "log")]
        tracing::info!(%target, "Client connected");

        Ok(Self {
            target,
            resolver,
            addresses,
            retry_max: options.retry_max,
            retry_backoff: options.retry_backoff,
        })
    }

    /// The dialed target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Snapshot of the addresses currently known for the target.
    pub fn addresses(&self) -> Arc<AddressSet> {
        self.addresses.load()
    }

    /// Asks the resolver to look the target up again soon.
    pub fn resolve_now(&self) {
        self.resolver.resolve_now();
    }

    /// Stops resolving; the current addresses stay usable.
    pub fn close(&self) {
        self.resolver.close();
    }

    /// Stops resolving and waits for the resolver to wind down.
    pub async fn shutdown(self) {
        self.resolver.close();
        self.resolver.join().await;
    }

    /// Performs an operation on the target's addresses, producing the first
    /// successful result or the last error if every attempt failed.
    ///
    /// Attempts walk the address set in order, wrapping around, with the
    /// retry backoff in between. Each failure also asks the resolver for a
    /// fresh lookup.
    pub async fn execute<T, E, Fut>(
        &self,
        func: impl FnMut(Address) -> Fut,
    ) -> Result<T, ExecuteError<E>>
    where
        E: std::error::Error,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut func = func;
        let addresses = self.addresses();
        if addresses.is_empty() {
            return Err(ExecuteError::NoAddresses);
        }

        let mut attempt = 0;
        loop {
            let candidate = &addresses[attempt as usize % addresses.len()];
            match func(candidate.clone()).await {
                Ok(res) => {
                    #[cfg(feature = "log")]
                    tracing::debug!(address = %candidate.addr, "execution attempt succeeded");
                    return Ok(res);
                }
                Err(err) => {
                    #[cfg(feature = "log")]
                    tracing::info!(
                        address = %candidate.addr,
                        error = %err,
                        "execution attempt failed"
                    );
                    self.resolver.resolve_now();
                    attempt += 1;
                    if attempt > self.retry_max {
                        return Err(ExecuteError::Call {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    tokio::time::sleep((self.retry_backoff)(attempt)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::fake::{FakeCatalog, Unavailable},
        resolver::{Builder, CatalogResolver},
        ServiceEntry, Target, TargetDescriptor,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn scheme_and_endpoint_win_over_literal() {
        let options = ClientOptions::new()
            .target("10.0.0.1:9000")
            .scheme("consul")
            .authority("127.0.0.1:8500")
            .endpoint("billing?dc=dc1");
        assert_eq!(
            options.target_string().unwrap(),
            "consul://127.0.0.1:8500/billing?dc=dc1"
        );
    }

    #[test]
    fn literal_target_without_endpoint() {
        let options = ClientOptions::new().target("10.0.0.1:9000").scheme("consul");
        assert_eq!(options.target_string().unwrap(), "10.0.0.1:9000");
    }

    #[test]
    fn missing_target_fails_fast() {
        assert!(matches!(
            ClientOptions::new().target_string(),
            Err(Error::MissingTarget)
        ));
        assert!(matches!(
            ClientOptions::new().endpoint("billing").target_string(),
            Err(Error::MissingTarget)
        ));
    }

    /// Resolves `fake:///anything` from a shared in-memory catalog.
    struct FakeBuilder(Arc<FakeCatalog>);

    #[async_trait]
    impl Builder for FakeBuilder {
        fn scheme(&self) -> &str {
            "fake"
        }

        async fn build(
            &self,
            target: &Target,
            conn: Arc<dyn ClientConn>,
            opts: BuildOptions,
        ) -> Result<Box<dyn Resolver>, Error> {
            let descriptor = TargetDescriptor::for_service(&*target.endpoint);
            let resolver = CatalogResolver::start(self.0.clone(), descriptor, conn, opts).await?;
            Ok(Box::new(resolver))
        }
    }

    fn registry(catalog: &Arc<FakeCatalog>) -> Registry {
        let registry = Registry::with_defaults();
        registry.register(FakeBuilder(catalog.clone())).unwrap();
        registry
    }

    fn instances() -> Vec<ServiceEntry> {
        vec![
            ServiceEntry::new("10.0.0.2", 9000),
            ServiceEntry::new("10.0.0.1", 9000),
        ]
    }

    #[derive(Debug, thiserror::Error)]
    #[error("refused")]
    struct Refused;

    #[tokio::test(start_paused = true)]
    async fn connect_and_execute() {
        let catalog = Arc::new(FakeCatalog::new([Ok(instances())]));
        let client = Client::connect(
            &registry(&catalog),
            ClientOptions::new().scheme("fake").endpoint("billing"),
        )
        .await
        .unwrap();
        assert_eq!(client.target(), "fake:///billing");
        assert_eq!(
            client.addresses().addrs().collect::<Vec<_>>(),
            ["10.0.0.1:9000", "10.0.0.2:9000"]
        );

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let result = client
            .execute(|address| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(address.addr.clone());
                    if address.addr == "10.0.0.1:9000" {
                        Err(Refused)
                    } else {
                        Ok(address.server_name)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "billing");
        assert_eq!(*seen.lock(), ["10.0.0.1:9000", "10.0.0.2:9000"]);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn execute_gives_up_after_retries() {
        let catalog = Arc::new(FakeCatalog::new([Ok(instances())]));
        let client = Client::connect(
            &registry(&catalog),
            ClientOptions::new()
                .target("fake:///billing")
                .retry_max(4)
                .retry_backoff(|attempt| Duration::from_millis(10 * attempt as u64)),
        )
        .await
        .unwrap();

        let calls = AtomicUsize::new(0);
        let result = client
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Refused) }
            })
            .await;
        assert!(matches!(result, Err(ExecuteError::Call { attempts: 5, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // The failures requested exactly one extra lookup.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(catalog.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_bootstrap_fails_connect() {
        let catalog = Arc::new(FakeCatalog::new([Err(Unavailable)]));
        let result = Client::connect(
            &registry(&catalog),
            ClientOptions::new().target("fake:///billing"),
        )
        .await;
        assert!(matches!(result, Err(Error::BootstrapResolutionFailed { .. })));
    }

    #[tokio::test]
    async fn unregistered_scheme_fails_connect() {
        let catalog = Arc::new(FakeCatalog::default());
        let result = Client::connect(
            &registry(&catalog),
            ClientOptions::new().target("etcd://10.0.0.1/billing"),
        )
        .await;
        assert!(matches!(result, Err(Error::UnknownScheme(s)) if s == "etcd"));
    }

    /// Never finishes bootstrapping.
    struct Stuck;

    #[async_trait]
    impl crate::catalog::Catalog for Stuck {
        type Error = Unavailable;

        async fn query(
            &self,
            _service: &str,
            _tag: &str,
            _healthy_only: bool,
            _opts: &crate::catalog::QueryOptions,
        ) -> Result<(Vec<ServiceEntry>, crate::catalog::QueryMeta), Self::Error> {
            std::future::pending().await
        }
    }

    struct StuckBuilder;

    #[async_trait]
    impl Builder for StuckBuilder {
        fn scheme(&self) -> &str {
            "stuck"
        }

        async fn build(
            &self,
            target: &Target,
            conn: Arc<dyn ClientConn>,
            opts: BuildOptions,
        ) -> Result<Box<dyn Resolver>, Error> {
            let descriptor = TargetDescriptor::for_service(&*target.endpoint);
            Ok(Box::new(
                CatalogResolver::start(Stuck, descriptor, conn, opts).await?,
            ))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_dial_times_out() {
        let registry = Registry::new();
        registry.register(StuckBuilder).unwrap();
        let result = Client::connect(
            &registry,
            ClientOptions::new()
                .target("stuck:///billing")
                .timeout(Duration::from_secs(2))
                .block(),
        )
        .await;
        assert!(matches!(result, Err(Error::DialTimeout(d)) if d == Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn literal_addresses_pass_through() {
        let client = Client::connect(
            &Registry::with_defaults(),
            ClientOptions::new().target("10.0.0.7:9000"),
        )
        .await
        .unwrap();
        assert_eq!(
            client.addresses().addrs().collect::<Vec<_>>(),
            ["10.0.0.7:9000"]
        );
    }

    #[tokio::test]
    async fn proxy_needs_a_supporting_scheme() {
        let result = Client::connect(
            &Registry::with_defaults(),
            ClientOptions::new()
                .target("10.0.0.7:9000")
                .scheme("passthrough")
                .proxy_address("10.0.0.8:9000"),
        )
        .await;
        assert!(matches!(result, Err(Error::FallbackUnsupported(_))));

        let result = Client::connect(
            &Registry::with_defaults(),
            ClientOptions::new()
                .target("consul://127.0.0.1:9/billing")
                .proxy_address("10.0.0.8:9000"),
        )
        .await;
        assert!(matches!(result, Err(Error::FallbackUnsupported(s)) if s == "consul"));
    }
}
