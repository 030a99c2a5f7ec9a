//! Errors produced while constructing and running resolvers.

use std::time::Duration;

/// Boxed error used where the underlying cause comes from a pluggable backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors encountered while building resolvers and clients.
///
/// Everything up to and including the first resolution of a target is
/// fail-fast and surfaces as one of these. Failures after that are handled
/// inside the watch loop and only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The target string is not of the form the resolver expects.
    #[error(
        "malformed target `{0}`, expected `consul://[user:password@]host/service?param=value`"
    )]
    MalformedTarget(String),
    /// A query parameter of the target could not be parsed.
    #[error("malformed parameter `{key}={value}` in target: {reason}")]
    MalformedParameters {
        /// Query key.
        key: String,
        /// Raw value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// Neither a literal target nor a scheme and endpoint were configured.
    #[error("no target configured, set either a literal target or a scheme and endpoint")]
    MissingTarget,
    /// No builder is registered for the target's scheme.
    #[error("no resolver registered for scheme `{0}`")]
    UnknownScheme(String),
    /// A builder is already registered for the scheme.
    #[error("a resolver is already registered for scheme `{0}`")]
    DuplicateScheme(String),
    /// The scheme's builder cannot route to a fallback proxy.
    #[error("resolver for scheme `{0}` does not support a fallback proxy")]
    FallbackUnsupported(String),
    /// The first lookup of a target failed or found nothing.
    #[error("bootstrap resolution of `{service}` failed: {reason}")]
    BootstrapResolutionFailed {
        /// Logical service being resolved.
        service: String,
        /// What went wrong.
        reason: String,
    },
    /// A lookup after bootstrap failed or found nothing. The previous address
    /// set stays in place.
    #[error("resolution of `{service}` failed, keeping previous addresses: {reason}")]
    TransientResolutionFailure {
        /// Logical service being resolved.
        service: String,
        /// What went wrong.
        reason: String,
    },
    /// A client for the registry could not be set up.
    #[error("registry at `{address}` is unreachable")]
    RegistryUnreachable {
        /// Registry address from the target.
        address: String,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },
    /// A blocking dial did not complete its first resolution in time.
    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),
}
