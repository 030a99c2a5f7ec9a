//! Resolvers turning dial targets into live address sets.
//!
//! A [`Builder`] is registered per URL scheme in a [`Registry`]. Building a
//! target performs its first resolution and, for catalog-backed schemes,
//! starts a [`CatalogResolver`] watching the catalog for changes. Every
//! resolved address set is pushed to the [`ClientConn`] the target was built
//! for.

use crate::{AddressSet, Error, Target};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

mod watch;
pub use watch::{CatalogResolver, State};

mod registry;
pub use registry::Registry;

mod passthrough;
pub use passthrough::PassthroughBuilder;

#[cfg(feature = "consul")]
mod consul;
#[cfg(feature = "consul")]
pub use consul::ConsulBuilder;

#[cfg(feature = "dns")]
mod dns;
#[cfg(feature = "dns")]
pub use dns::DnsBuilder;

/// Minimum time between two resolutions of one target, however often
/// re-resolution is requested.
pub const MIN_RESOLUTION_INTERVAL: Duration = Duration::from_secs(5);

/// The connection a resolver delivers address sets to.
pub trait ClientConn: Send + Sync {
    /// Replaces the connection's addresses. Sets are sorted by address.
    fn update_state(&self, addresses: AddressSet);
}

/// A running resolution of one target.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Requests an extra resolution. Never blocks; requests made while one is
    /// already pending are dropped.
    fn resolve_now(&self);

    /// Stops resolving. Idempotent, and does not wait for background work;
    /// see [`Resolver::join`].
    fn close(&self);

    /// Waits until background work has stopped after [`Resolver::close`].
    async fn join(&self);
}

/// Options passed to [`Builder::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Minimum spacing between resolutions.
    pub min_resolution_interval: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            min_resolution_interval: MIN_RESOLUTION_INTERVAL,
        }
    }
}

/// Creates resolvers for targets of one scheme.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Scheme this builder handles.
    fn scheme(&self) -> &str;

    /// Resolves `target` for the first time, delivering the result to
    /// `conn`, and returns the resolver keeping it up to date.
    ///
    /// Fails if the target is malformed or if the first resolution fails.
    async fn build(
        &self,
        target: &Target,
        conn: Arc<dyn ClientConn>,
        opts: BuildOptions,
    ) -> Result<Box<dyn Resolver>, Error>;

    /// A builder for the same scheme that routes to `proxy` when the target
    /// can't be resolved. Builders without such a fallback return `None`.
    fn with_fallback_proxy(&self, _proxy: &str) -> Option<Result<Arc<dyn Builder>, Error>> {
        None
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex;

    /// Records every delivered address set.
    #[derive(Debug, Default)]
    pub struct RecordingConn {
        updates: Mutex<Vec<AddressSet>>,
    }

    impl RecordingConn {
        pub fn updates(&self) -> Vec<AddressSet> {
            self.updates.lock().clone()
        }

        pub fn latest(&self) -> Option<Vec<String>> {
            self.updates
                .lock()
                .last()
                .map(|set| set.addrs().map(String::from).collect())
        }
    }

    impl ClientConn for RecordingConn {
        fn update_state(&self, addresses: AddressSet) {
            self.updates.lock().push(addresses);
        }
    }
}
