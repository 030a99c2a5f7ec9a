//! `dns://` targets.

use super::{BuildOptions, Builder, CatalogResolver, ClientConn, Resolver};
use crate::{
    catalog::hickory::DnsCatalog, target::DNS_SCHEME, Error, ServiceEntry, Target, TargetDescriptor,
};
use async_trait::async_trait;
use std::{net::SocketAddr, sync::Arc};

/// Builder for `dns://[nameserver]/name` targets.
///
/// `name` is either `host:port`, resolved through A/AAAA records, or a SRV
/// name such as `_grpc._tcp.billing.internal`. The optional authority is the
/// `ip:port` of the nameserver to use instead of the system's.
#[derive(Debug, Clone, Default)]
pub struct DnsBuilder {
    proxy: Option<ServiceEntry>,
}

impl DnsBuilder {
    /// A builder whose resolvers deliver `proxy` when DNS has no answer.
    pub fn with_proxy(proxy: ServiceEntry) -> Self {
        Self { proxy: Some(proxy) }
    }
}

#[async_trait]
impl Builder for DnsBuilder {
    fn scheme(&self) -> &str {
        DNS_SCHEME
    }

    async fn build(
        &self,
        target: &Target,
        conn: Arc<dyn ClientConn>,
        opts: BuildOptions,
    ) -> Result<Box<dyn Resolver>, Error> {
        let malformed = || Error::MalformedTarget(target.to_string());
        if target.endpoint.is_empty() {
            return Err(malformed());
        }
        let nameserver = match target.authority.as_str() {
            "" => None,
            authority => Some(authority.parse::<SocketAddr>().map_err(|_| malformed())?),
        };
        let catalog =
            DnsCatalog::new(nameserver, self.proxy.clone()).map_err(|e| Error::RegistryUnreachable {
                address: target.authority.clone(),
                source: Box::new(e),
            })?;
        let descriptor = TargetDescriptor {
            registry_address: target.authority.clone(),
            ..TargetDescriptor::for_service(&*target.endpoint)
        };
        let resolver = CatalogResolver::start(catalog, descriptor, conn, opts).await?;
        Ok(Box::new(resolver))
    }

    fn with_fallback_proxy(&self, proxy: &str) -> Option<Result<Arc<dyn Builder>, Error>> {
        Some(match ServiceEntry::parse(proxy) {
            Some(proxy) => Ok(Arc::new(Self::with_proxy(proxy))),
            None => Err(Error::MalformedTarget(proxy.to_string())),
        })
    }
}
