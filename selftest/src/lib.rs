/*!

Provides utilities for testing the provisioning harness against a throw-away `kind` cluster.
These are only used by the integration tests, which require `docker` and `kind`.

!*/

pub mod cluster;
mod test_settings;

pub use cluster::Cluster;
