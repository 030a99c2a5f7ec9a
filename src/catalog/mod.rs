//! Service catalogs resolvers query for instances.
//!
//! Resolvers only ever talk to a catalog through [`Catalog`], so any
//! registry can be plugged in, and tests can drive the watch loop with an
//! in-memory fake.

use crate::ServiceEntry;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "consul")]
pub mod consul;

#[cfg(feature = "dns")]
pub mod hickory;

/// Options of a single catalog query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Index returned by the previous query. Non-zero values make the query
    /// block until the catalog changes past it or `wait` elapses.
    pub wait_index: u64,
    /// Proximity hint for result ordering.
    pub near: String,
    /// Maximum time to block on `wait_index`.
    pub wait: Duration,
    /// Datacenter to query, if non-empty.
    pub datacenter: String,
    /// Allow stale reads.
    pub allow_stale: bool,
    /// Require consistent reads.
    pub require_consistent: bool,
}

/// Metadata returned alongside query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMeta {
    /// Catalog index to long-poll on next.
    pub last_index: u64,
}

/// Source of service instances.
#[async_trait]
pub trait Catalog: Send + Sync + 'static {
    /// Errors produced by queries.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Looks up the instances of `service`, optionally restricted to those
    /// carrying `tag` and to those passing health checks.
    async fn query(
        &self,
        service: &str,
        tag: &str,
        healthy_only: bool,
        opts: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta), Self::Error>;
}

#[async_trait]
impl<C: Catalog + ?Sized> Catalog for std::sync::Arc<C> {
    type Error = C::Error;

    async fn query(
        &self,
        service: &str,
        tag: &str,
        healthy_only: bool,
        opts: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, QueryMeta), Self::Error> {
        (**self).query(service, tag, healthy_only, opts).await
    }
}
