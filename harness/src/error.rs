use crate::status::{is_already_exists, HttpStatusCode, StatusCode};
use snafu::Snafu;
use std::path::PathBuf;
use std::time::Duration;

/// The `Result` type returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The public error type returned by this crate.
#[derive(Debug, Snafu)]
pub struct Error(InnerError);

/// The private error type returned by this crate.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum InnerError {
    #[snafu(display("Unable to create client: {}", source))]
    ClientCreate { source: kube::Error },

    #[snafu(display("Unable to create client from kubeconfig: {}", source))]
    ClientCreateKubeconfig {
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("Unable to read kubeconfig '{}': {}", path.display(), source))]
    ConfigRead {
        path: PathBuf,
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("Failed to create {} '{}': {}", kind, name, source))]
    Create {
        kind: String,
        name: String,
        source: kube::Error,
    },

    #[snafu(display("Failed to delete {} '{}': {}", kind, name, source))]
    Delete {
        kind: String,
        name: String,
        source: kube::Error,
    },

    #[snafu(display("The '{}' deployment has no container to patch", name))]
    DeploymentContainers { name: String },

    #[snafu(display(
        "Error obtaining mapping for {}/{} {}: {}",
        group,
        version,
        kind,
        source
    ))]
    Discovery {
        group: String,
        version: String,
        kind: String,
        source: kube::Error,
    },

    #[snafu(display("Error {} resource [group={} - kind={}]: {}", action, group, kind, source))]
    Dynamic {
        action: String,
        group: String,
        kind: String,
        source: kube::Error,
    },

    #[snafu(display("Unable to decode manifest envelope: {}", source))]
    Envelope { source: serde_json::Error },

    #[snafu(display("Unable to fetch manifest from '{}': {}", url, source))]
    Fetch {
        url: String,
        source: reqwest::Error,
    },

    #[snafu(display("Can't edit operator builder post-finalization (setting '{}')", setting))]
    Finalized { setting: String },

    #[snafu(display("Failed to get {} '{}': {}", kind, name, source))]
    Get {
        kind: String,
        name: String,
        source: kube::Error,
    },

    #[snafu(display("Manifest has no valid apiVersion and kind"))]
    Gvk,

    #[snafu(display("Invalid settings in the environment: {}", source))]
    InvalidSettings { source: envy::Error },

    #[snafu(display("Manifest definitions were not supplied for operator '{}'", name))]
    ManifestSourceMissing { name: String },

    #[snafu(display("Unable to parse manifest: {}", source))]
    ManifestParse { source: serde_yaml::Error },

    #[snafu(display("Operator '{}' has no deployment", name))]
    NoDeployment { name: String },

    #[snafu(display("Manifest has no valid {}", field))]
    MissingField { field: String },

    #[snafu(display("An operator namespace was not supplied"))]
    MissingNamespace,

    #[snafu(display("Unable to read manifest file '{}': {}", path.display(), source))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Timed out after {:?} waiting for {}", timeout, what))]
    Timeout { what: String, timeout: Duration },

    #[snafu(display("Failed to load {} from manifest definition: {}", kind, source))]
    TypedDecode {
        kind: String,
        source: serde_json::Error,
    },

    #[snafu(display("Can't find item type '{}'", kind))]
    UnsupportedKind { kind: String },

    #[snafu(display("Failed to update {} '{}': {}", kind, name, source))]
    Update {
        kind: String,
        name: String,
        source: kube::Error,
    },
}

impl InnerError {
    fn kube_error(&self) -> Option<&kube::Error> {
        match self {
            InnerError::ClientCreate { source }
            | InnerError::Create { source, .. }
            | InnerError::Delete { source, .. }
            | InnerError::Discovery { source, .. }
            | InnerError::Dynamic { source, .. }
            | InnerError::Get { source, .. }
            | InnerError::Update { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl Error {
    /// `true` if a readiness wait ran out of time before its condition was met.
    pub fn is_timeout(&self) -> bool {
        matches!(self.0, InnerError::Timeout { .. })
    }

    /// `true` if the API server refused a create because the object is already present.
    pub fn is_already_exists(&self) -> bool {
        self.0.kube_error().map(is_already_exists).unwrap_or_default()
    }

    /// `true` if the API server answered `NOT_FOUND`.
    pub fn is_not_found(&self) -> bool {
        self.is_status_code(StatusCode::NOT_FOUND)
    }

    /// `true` for configuration mistakes that no retry can fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.0,
            InnerError::Finalized { .. }
                | InnerError::ManifestSourceMissing { .. }
                | InnerError::MissingNamespace
                | InnerError::NoDeployment { .. }
                | InnerError::DeploymentContainers { .. }
                | InnerError::InvalidSettings { .. }
        )
    }

    /// `true` if a manifest could not be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(
            self.0,
            InnerError::Envelope { .. }
                | InnerError::Gvk
                | InnerError::ManifestParse { .. }
                | InnerError::MissingField { .. }
                | InnerError::TypedDecode { .. }
                | InnerError::UnsupportedKind { .. }
        )
    }
}

impl HttpStatusCode for InnerError {
    fn status_code(&self) -> Option<StatusCode> {
        self.kube_error().and_then(|e| e.status_code())
    }
}

impl HttpStatusCode for Error {
    fn status_code(&self) -> Option<StatusCode> {
        self.0.status_code()
    }
}
