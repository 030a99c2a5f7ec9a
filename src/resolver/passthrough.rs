//! Literal addresses that need no resolution.

use super::{BuildOptions, Builder, ClientConn, Resolver};
use crate::{target::PASSTHROUGH_SCHEME, AddressSet, Error, Target};
use async_trait::async_trait;
use std::sync::Arc;

/// Builder for `passthrough:///host:port` and scheme-less targets. Delivers
/// the endpoint as the only address, once.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughBuilder;

#[derive(Debug)]
struct PassthroughResolver;

#[async_trait]
impl Resolver for PassthroughResolver {
    fn resolve_now(&self) {}

    fn close(&self) {}

    async fn join(&self) {}
}

#[async_trait]
impl Builder for PassthroughBuilder {
    fn scheme(&self) -> &str {
        PASSTHROUGH_SCHEME
    }

    async fn build(
        &self,
        target: &Target,
        conn: Arc<dyn ClientConn>,
        _opts: BuildOptions,
    ) -> Result<Box<dyn Resolver>, Error> {
        if target.endpoint.is_empty() {
            return Err(Error::MalformedTarget(target.to_string()));
        }
        conn.update_state(AddressSet::single(&*target.endpoint, &*target.endpoint));
        Ok(Box::new(PassthroughResolver))
    }
}
