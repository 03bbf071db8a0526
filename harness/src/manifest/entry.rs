use crate::constants::{
    KIND_CLUSTER_ROLE, KIND_CLUSTER_ROLE_BINDING, KIND_CONFIG_MAP, KIND_CRD, KIND_DEPLOYMENT,
    KIND_ROLE, KIND_ROLE_BINDING, KIND_SERVICE_ACCOUNT,
};
use crate::error::{self, Result};
use serde::Deserialize;
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use std::fmt::{Display, Formatter};

/// The kinds the manifest-driven setup knows how to handle. Matching is exact and
/// case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    ServiceAccount,
    Role,
    ClusterRole,
    RoleBinding,
    ClusterRoleBinding,
    CustomResourceDefinition,
    Deployment,
    /// Provisioned elsewhere; manifest-driven setup skips it.
    ConfigMap,
    Unrecognized(String),
}

impl ManifestKind {
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            KIND_SERVICE_ACCOUNT => ManifestKind::ServiceAccount,
            KIND_ROLE => ManifestKind::Role,
            KIND_CLUSTER_ROLE => ManifestKind::ClusterRole,
            KIND_ROLE_BINDING => ManifestKind::RoleBinding,
            KIND_CLUSTER_ROLE_BINDING => ManifestKind::ClusterRoleBinding,
            KIND_CRD => ManifestKind::CustomResourceDefinition,
            KIND_DEPLOYMENT => ManifestKind::Deployment,
            KIND_CONFIG_MAP => ManifestKind::ConfigMap,
            other => ManifestKind::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ManifestKind::ServiceAccount => KIND_SERVICE_ACCOUNT,
            ManifestKind::Role => KIND_ROLE,
            ManifestKind::ClusterRole => KIND_CLUSTER_ROLE,
            ManifestKind::RoleBinding => KIND_ROLE_BINDING,
            ManifestKind::ClusterRoleBinding => KIND_CLUSTER_ROLE_BINDING,
            ManifestKind::CustomResourceDefinition => KIND_CRD,
            ManifestKind::Deployment => KIND_DEPLOYMENT,
            ManifestKind::ConfigMap => KIND_CONFIG_MAP,
            ManifestKind::Unrecognized(kind) => kind.as_str(),
        }
    }

    /// `true` if objects of this kind exist once per cluster rather than once per namespace.
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(
            self,
            ManifestKind::ClusterRole
                | ManifestKind::ClusterRoleBinding
                | ManifestKind::CustomResourceDefinition
        )
    }
}

impl Display for ManifestKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Only the fields needed to route a document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    api_version: String,
    kind: String,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    spec: Value,
}

/// One decoded manifest document: its routing envelope plus the full document for the handler.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    api_version: String,
    kind: ManifestKind,
    name: String,
    metadata: Value,
    spec: Value,
    document: Value,
}

impl ManifestEntry {
    /// Decode the envelope of `document`. `apiVersion`, `kind` and `metadata.name` are required.
    pub fn from_value(document: Value) -> Result<Self> {
        let envelope = Envelope::deserialize(&document).context(error::EnvelopeSnafu)?;
        let name = envelope
            .metadata
            .get("name")
            .and_then(Value::as_str)
            .context(error::MissingFieldSnafu {
                field: "metadata.name",
            })?
            .to_string();
        Ok(Self {
            api_version: envelope.api_version,
            kind: ManifestKind::from_kind(&envelope.kind),
            name,
            metadata: envelope.metadata,
            spec: envelope.spec,
            document,
        })
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn kind(&self) -> &ManifestKind {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    pub fn spec(&self) -> &Value {
        &self.spec
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_document(self) -> Value {
        self.document
    }
}
