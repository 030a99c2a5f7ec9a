//! `consul://` targets.

use super::{BuildOptions, Builder, CatalogResolver, ClientConn, Resolver};
use crate::{catalog::consul::ConsulCatalog, target::CONSUL_SCHEME, Error, Target, TargetDescriptor};
use async_trait::async_trait;
use std::sync::Arc;

/// Builder for `consul://[user:password@]host/service?param=value` targets,
/// watching the consul health API. See [`TargetDescriptor::parse`] for the
/// accepted parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsulBuilder;

#[async_trait]
impl Builder for ConsulBuilder {
    fn scheme(&self) -> &str {
        CONSUL_SCHEME
    }

    async fn build(
        &self,
        target: &Target,
        conn: Arc<dyn ClientConn>,
        opts: BuildOptions,
    ) -> Result<Box<dyn Resolver>, Error> {
        let descriptor = TargetDescriptor::parse(&target.to_string())?;
        let catalog = ConsulCatalog::new(&descriptor)?;
        let resolver = CatalogResolver::start(catalog, descriptor, conn, opts).await?;
        Ok(Box::new(resolver))
    }
}
