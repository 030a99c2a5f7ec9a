#![deny(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

/*!
Service-discovery resolvers for RPC clients.

# Introduction

Services in a deployment are rarely dialed by fixed address. Instead they are
named by a logical service name, and a registry such as
[consul](https://developer.hashicorp.com/consul) or DNS knows which instances
currently serve it. A target such as

`consul://127.0.0.1:8500/billing?healthy=true&dc=dc1`

asks the consul agent at `127.0.0.1:8500` for the healthy instances of
`billing` in datacenter `dc1`.

`catalog-resolver` turns such targets into address sets and keeps them up to
date. [`Client::connect`] picks a resolver [`Builder`] by the target's scheme
from a [`Registry`], resolves the target once, and starts a background task
re-resolving it:

- every 10 seconds while the registry returns instances,
- with exponential [backoff] while it fails or returns none,
- and on demand through [`Resolver::resolve_now`], never more than once every
  5 seconds however often it is asked.

A first resolution that fails or finds nothing fails the dial with
[`Error::BootstrapResolutionFailed`], since a client without peers can't make
progress. Later failures keep the last known addresses and are only logged.

# Alternative Registries

Resolvers only query registries through the [`Catalog`] trait. The provided
catalogs are enabled by the following features:

- `consul` (via [`ConsulCatalog`], scheme `consul`)
- `dns` (via [`DnsCatalog`], scheme `dns`)

Targets without a scheme, such as `10.0.0.1:9000`, are used as-is.

[`Builder`]: resolver::Builder
[`Registry`]: resolver::Registry
[`Resolver::resolve_now`]: resolver::Resolver::resolve_now
[`Catalog`]: catalog::Catalog
[`ConsulCatalog`]: catalog::consul::ConsulCatalog
[`DnsCatalog`]: catalog::hickory::DnsCatalog
*/

mod address;
pub use address::{Address, AddressSet, ServiceEntry};

pub mod backoff;

pub mod catalog;

mod client;
pub use client::{AddressBook, Client, ClientOptions, ExecuteError, RetryBackoff};
#[cfg(feature = "serde")]
pub use client::ClientConfig;

mod error;
pub use error::{BoxError, Error};

pub mod resolver;

pub mod target;
pub use target::{Credentials, Target, TargetDescriptor};
