//! Scheme to builder mapping.

use super::{BuildOptions, Builder, ClientConn, Resolver};
use crate::{Error, Target};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// Resolver builders keyed by the scheme they handle.
///
/// A registry is set up once while wiring the process together and shared by
/// reference with every client built from it.
#[derive(Default)]
pub struct Registry {
    builders: RwLock<HashMap<String, Arc<dyn Builder>>>,
    fallbacks: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes = self.builders.read().keys().cloned().collect::<Vec<_>>();
        schemes.sort();
        f.debug_struct("Registry")
            .field("schemes", &schemes)
            .field("fallbacks", &*self.fallbacks.lock())
            .finish()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every builder this crate provides: `passthrough`,
    /// plus `consul` and `dns` when their features are enabled.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let mut defaults: Vec<Arc<dyn Builder>> = vec![Arc::new(super::PassthroughBuilder)];
        #[cfg(feature = "consul")]
        defaults.push(Arc::new(super::ConsulBuilder));
        #[cfg(feature = "dns")]
        defaults.push(Arc::new(super::DnsBuilder::default()));
        {
            let mut builders = registry.builders.write();
            for builder in defaults {
                builders.insert(builder.scheme().to_string(), builder);
            }
        }
        registry
    }

    /// Registers `builder` for its scheme.
    pub fn register(&self, builder: impl Builder + 'static) -> Result<(), Error> {
        let scheme = builder.scheme().to_string();
        let mut builders = self.builders.write();
        if builders.contains_key(&scheme) {
            return Err(Error::DuplicateScheme(scheme));
        }
        builders.insert(scheme, Arc::new(builder));
        Ok(())
    }

    /// Replaces the builder for `scheme` with one that falls back to `proxy`.
    ///
    /// This happens at most once per scheme: later calls, whatever their
    /// proxy, return `Ok(false)` and change nothing.
    pub fn register_fallback_proxy(&self, scheme: &str, proxy: &str) -> Result<bool, Error> {
        let mut installed = self.fallbacks.lock();
        if installed.contains(scheme) {
            #[cfg(feature = "log")]
            tracing::debug!(scheme, proxy, "Fallback proxy already installed");
            return Ok(false);
        }
        let builder = self
            .get(scheme)?
            .with_fallback_proxy(proxy)
            .ok_or_else(|| Error::FallbackUnsupported(scheme.to_string()))??;
        self.builders.write().insert(scheme.to_string(), builder);
        installed.insert(scheme.to_string());
        #[cfg(feature = "log")]
        tracing::info!(scheme, proxy, "Installed fallback proxy");
        Ok(true)
    }

    /// Looks up the builder for `scheme`.
    pub fn get(&self, scheme: &str) -> Result<Arc<dyn Builder>, Error> {
        self.builders
            .read()
            .get(scheme)
            .cloned()
            .ok_or_else(|| Error::UnknownScheme(scheme.to_string()))
    }

    /// Builds a resolver for `target` with the builder registered for its
    /// scheme.
    pub async fn build(
        &self,
        target: &str,
        conn: Arc<dyn ClientConn>,
        opts: BuildOptions,
    ) -> Result<Box<dyn Resolver>, Error> {
        let target = Target::parse(target);
        let builder = self.get(&target.scheme)?;
        builder.build(&target, conn, opts).await
    }
}
