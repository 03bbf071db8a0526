/*!

Provisions an operator into a cluster from declarative manifests, and tears it down again.

Manifests are routed by `kind`. Well-known kinds (service accounts, roles, cluster roles, their
bindings, CRDs and deployments) are created with typed clients, and the operator deployment is
patched with the configured image, command and name first. Anything else can be applied through
the [`DynamicApplier`], which resolves each kind with API discovery. Objects that already exist are
not an error: they are kept on teardown. The [`wait`] module blocks until the provisioned workloads
are ready.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use builder::{OperatorBuilder, OwnershipPolicy, ProvisioningConfig};
pub use dynamic::{DynamicAction, DynamicApplier};
pub use error::{Error, Result};
pub use family::OperatorFamily;
pub use manifest::{ManifestEntry, ManifestKind, ManifestSource};
pub use operator::{LifecycleState, Operator};
pub use settings::{client_from_kubeconfig, Settings};
pub use status::{AllowNotFound, HttpStatusCode, StatusCode};
pub use typed::{CrdManifest, Provisioned, Tracked};
pub use wait::PollOutcome;

mod builder;
pub mod constants;
mod dynamic;
mod error;
mod family;
pub mod manifest;
#[cfg(test)]
mod mock;
mod operator;
mod settings;
mod status;
mod typed;
pub mod wait;
