use std::time::Duration;

/// Default interval between readiness checks.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Default deadline for a readiness wait.
pub const TIMEOUT: Duration = Duration::from_secs(600);
/// Interval between checks while waiting for something to go away.
pub const CLEANUP_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// Deadline while waiting for something to go away.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// The environment variable an operator reads to decide which namespace to watch. An empty value
/// means all namespaces.
pub const ENV_WATCH_NAMESPACE: &str = "WATCH_NAMESPACE";

/// Prefix of the environment variables read by [`Settings`](crate::Settings).
pub const SETTINGS_ENV_PREFIX: &str = "HARNESS_";

// Manifest kinds with a typed handler
pub const KIND_CLUSTER_ROLE: &str = "ClusterRole";
pub const KIND_CLUSTER_ROLE_BINDING: &str = "ClusterRoleBinding";
pub const KIND_CONFIG_MAP: &str = "ConfigMap";
pub const KIND_CRD: &str = "CustomResourceDefinition";
pub const KIND_DEPLOYMENT: &str = "Deployment";
pub const KIND_ROLE: &str = "Role";
pub const KIND_ROLE_BINDING: &str = "RoleBinding";
pub const KIND_SERVICE_ACCOUNT: &str = "ServiceAccount";
