/*!

Handlers for the manifest kinds the engine knows by type. Each manifest is decoded into its
concrete `k8s-openapi` type, patched where the configuration asks for it, and created with a
typed client. An "already exists" answer is not an error: the object is recorded as not owned so
teardown leaves it alone.

!*/

use crate::constants::ENV_WATCH_NAMESPACE;
use crate::dynamic::{DynamicAction, DynamicApplier};
use crate::error::{self, Result};
use crate::manifest::{ManifestEntry, ManifestKind};
use crate::status::{is_already_exists, AllowNotFound};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, EnvVar, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use snafu::{IntoError, OptionExt, ResultExt};
use std::fmt::Debug;

/// A typed object recorded during setup, and whether this instance is responsible for deleting it.
#[derive(Debug, Clone)]
pub struct Tracked<T> {
    object: T,
    owned: bool,
}

impl<T> Tracked<T>
where
    T: Resource,
{
    fn created(object: T) -> Self {
        Self {
            object,
            owned: true,
        }
    }

    fn kept(object: T) -> Self {
        Self {
            object,
            owned: false,
        }
    }

    pub fn object(&self) -> &T {
        &self.object
    }

    pub fn into_object(self) -> T {
        self.object
    }

    /// `false` if the object was already present when setup tried to create it.
    pub fn owned(&self) -> bool {
        self.owned
    }

    pub fn name(&self) -> String {
        self.object.name_any()
    }
}

/// A CRD recorded during setup. CRDs go through the dynamic applier, so the document is kept for
/// deletion instead of a typed object.
#[derive(Debug, Clone, PartialEq)]
pub struct CrdManifest {
    name: String,
    document: Value,
    owned: bool,
}

impl CrdManifest {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn owned(&self) -> bool {
        self.owned
    }
}

/// The outcome of handling one manifest entry.
#[derive(Debug, Clone)]
pub(crate) enum Handled {
    ServiceAccount(Tracked<ServiceAccount>),
    Role(Tracked<Role>),
    ClusterRole(Tracked<ClusterRole>),
    RoleBinding(Tracked<RoleBinding>),
    ClusterRoleBinding(Tracked<ClusterRoleBinding>),
    Crd(CrdManifest),
    Deployment(Tracked<Deployment>),
    /// Nothing was sent to the cluster.
    Skipped,
}

impl Handled {
    /// `true` if the cluster already had the object.
    pub(crate) fn already_existed(&self) -> bool {
        match self {
            Handled::ServiceAccount(t) => !t.owned,
            Handled::Role(t) => !t.owned,
            Handled::ClusterRole(t) => !t.owned,
            Handled::RoleBinding(t) => !t.owned,
            Handled::ClusterRoleBinding(t) => !t.owned,
            Handled::Crd(crd) => !crd.owned,
            Handled::Deployment(t) => !t.owned,
            Handled::Skipped => false,
        }
    }
}

/// Everything setup created or found, per kind, in the order it was handled. Teardown deletes by
/// the recorded names without reading the cluster again.
#[derive(Debug, Clone, Default)]
pub struct Provisioned {
    service_accounts: Vec<Tracked<ServiceAccount>>,
    roles: Vec<Tracked<Role>>,
    cluster_roles: Vec<Tracked<ClusterRole>>,
    role_bindings: Vec<Tracked<RoleBinding>>,
    cluster_role_bindings: Vec<Tracked<ClusterRoleBinding>>,
    crds: Vec<CrdManifest>,
    deployments: Vec<Tracked<Deployment>>,
}

impl Provisioned {
    pub fn service_accounts(&self) -> &[Tracked<ServiceAccount>] {
        &self.service_accounts
    }

    pub fn roles(&self) -> &[Tracked<Role>] {
        &self.roles
    }

    pub fn cluster_roles(&self) -> &[Tracked<ClusterRole>] {
        &self.cluster_roles
    }

    pub fn role_bindings(&self) -> &[Tracked<RoleBinding>] {
        &self.role_bindings
    }

    pub fn cluster_role_bindings(&self) -> &[Tracked<ClusterRoleBinding>] {
        &self.cluster_role_bindings
    }

    pub fn crds(&self) -> &[CrdManifest] {
        &self.crds
    }

    pub fn deployments(&self) -> &[Tracked<Deployment>] {
        &self.deployments
    }

    /// The most recently handled deployment, which is the operator workload.
    pub fn deployment(&self) -> Option<&Tracked<Deployment>> {
        self.deployments.last()
    }

    pub fn is_empty(&self) -> bool {
        self.service_accounts.is_empty()
            && self.roles.is_empty()
            && self.cluster_roles.is_empty()
            && self.role_bindings.is_empty()
            && self.cluster_role_bindings.is_empty()
            && self.crds.is_empty()
            && self.deployments.is_empty()
    }

    pub(crate) fn record(&mut self, handled: Handled) {
        match handled {
            Handled::ServiceAccount(t) => record_tracked(&mut self.service_accounts, t),
            Handled::Role(t) => record_tracked(&mut self.roles, t),
            Handled::ClusterRole(t) => record_tracked(&mut self.cluster_roles, t),
            Handled::RoleBinding(t) => record_tracked(&mut self.role_bindings, t),
            Handled::ClusterRoleBinding(t) => record_tracked(&mut self.cluster_role_bindings, t),
            Handled::Deployment(t) => record_tracked(&mut self.deployments, t),
            Handled::Crd(crd) => match self.crds.iter_mut().find(|c| c.name == crd.name) {
                Some(previous) => {
                    previous.owned |= crd.owned;
                    previous.document = crd.document;
                }
                None => self.crds.push(crd),
            },
            Handled::Skipped => {}
        }
    }
}

/// A second manifest with the same name replaces the recorded object. If either one was created by
/// this instance, the record stays owned.
fn record_tracked<T>(records: &mut Vec<Tracked<T>>, next: Tracked<T>)
where
    T: Resource,
{
    let name = next.name();
    match records.iter_mut().find(|t| t.name() == name) {
        Some(previous) => {
            let owned = previous.owned || next.owned;
            *previous = next;
            previous.owned = owned;
        }
        None => records.push(next),
    }
}

/// Changes made to a deployment manifest before it is created. Each one applies only when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DeploymentPatches {
    pub(crate) image: Option<String>,
    pub(crate) command: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) global: bool,
}

impl DeploymentPatches {
    fn needs_container(&self) -> bool {
        self.image.is_some() || self.command.is_some() || self.global
    }

    /// Patch order: image, command, name, then the watch-all-namespaces env var.
    pub(crate) fn apply(&self, deployment: &mut Deployment) -> Result<()> {
        let original_name = deployment.name_any();
        if self.needs_container() {
            let container = first_container(deployment).context(
                error::DeploymentContainersSnafu {
                    name: &original_name,
                },
            )?;
            if let Some(image) = &self.image {
                debug!("Using image '{}' for deployment '{}'", image, original_name);
                container.image = Some(image.clone());
            }
            if let Some(command) = &self.command {
                debug!("Using command '{}' for deployment '{}'", command, original_name);
                container.command = Some(vec![command.clone()]);
            }
        }
        if let Some(name) = &self.name {
            debug!("Renaming deployment '{}' to '{}'", original_name, name);
            deployment.metadata.name = Some(name.clone());
        }
        if self.global {
            debug!("Patching env of deployment '{}' to watch all namespaces", original_name);
            if let Some(container) = first_container(deployment) {
                container.env.get_or_insert_with(Vec::new).push(EnvVar {
                    name: ENV_WATCH_NAMESPACE.to_string(),
                    value: Some(String::new()),
                    value_from: None,
                });
            }
        }
        Ok(())
    }
}

fn first_container(deployment: &mut Deployment) -> Option<&mut Container> {
    deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .and_then(|pod| pod.containers.first_mut())
}

/// Routes manifest entries to the typed handler for their kind.
pub(crate) struct TypedHandlers<'a> {
    pub(crate) client: &'a Client,
    pub(crate) namespace: &'a str,
    pub(crate) patches: &'a DeploymentPatches,
    /// CRDs are assumed to be installed already and are neither created nor recorded.
    pub(crate) skip_crds: bool,
}

impl TypedHandlers<'_> {
    pub(crate) async fn handle(&self, entry: ManifestEntry) -> Result<Handled> {
        info!("Setting up {} '{}'", entry.kind(), entry.name());
        let kind = entry.kind().clone();
        Ok(match kind {
            ManifestKind::ServiceAccount => {
                let object: ServiceAccount = decode(&entry)?;
                Handled::ServiceAccount(self.create_namespaced(&entry, object).await?)
            }
            ManifestKind::Role => {
                let object: Role = decode(&entry)?;
                Handled::Role(self.create_namespaced(&entry, object).await?)
            }
            ManifestKind::ClusterRole => {
                let object: ClusterRole = decode(&entry)?;
                Handled::ClusterRole(self.create_cluster(&entry, object).await?)
            }
            ManifestKind::RoleBinding => {
                let object: RoleBinding = decode(&entry)?;
                Handled::RoleBinding(self.create_namespaced(&entry, object).await?)
            }
            ManifestKind::ClusterRoleBinding => {
                let object: ClusterRoleBinding = decode(&entry)?;
                Handled::ClusterRoleBinding(self.create_cluster(&entry, object).await?)
            }
            ManifestKind::Deployment => {
                let mut deployment: Deployment = decode(&entry)?;
                self.patches.apply(&mut deployment)?;
                Handled::Deployment(self.create_namespaced(&entry, deployment).await?)
            }
            ManifestKind::CustomResourceDefinition => {
                if self.skip_crds {
                    info!(
                        "Not setting up CRD '{}', admin resources are provisioned elsewhere",
                        entry.name()
                    );
                    Handled::Skipped
                } else {
                    self.create_crd(entry).await?
                }
            }
            ManifestKind::ConfigMap => {
                debug!("Skipping ConfigMap '{}'", entry.name());
                Handled::Skipped
            }
            ManifestKind::Unrecognized(kind) => error::UnsupportedKindSnafu { kind }.fail()?,
        })
    }

    async fn create_namespaced<K>(&self, entry: &ManifestEntry, mut object: K) -> Result<Tracked<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize,
    {
        object.meta_mut().namespace = Some(self.namespace.to_string());
        let api: Api<K> = Api::namespaced(self.client.clone(), self.namespace);
        create(&api, entry.kind(), object).await
    }

    async fn create_cluster<K>(&self, entry: &ManifestEntry, object: K) -> Result<Tracked<K>>
    where
        K: Resource<Scope = ClusterResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize,
    {
        let api: Api<K> = Api::all(self.client.clone());
        create(&api, entry.kind(), object).await
    }

    /// CRDs are served under more than one API version, so they go through discovery.
    async fn create_crd(&self, entry: ManifestEntry) -> Result<Handled> {
        let name = entry.name().to_string();
        let document = entry.into_document();
        let applier = DynamicApplier::new(self.client.clone(), self.namespace);
        let owned = match applier
            .apply_document(DynamicAction::Create, document.clone())
            .await
        {
            Ok(_) => true,
            Err(e) if e.is_already_exists() => {
                warn!("CRD '{}' already exists and will be kept on teardown", name);
                false
            }
            Err(e) => return Err(e),
        };
        Ok(Handled::Crd(CrdManifest {
            name,
            document,
            owned,
        }))
    }
}

fn decode<K>(entry: &ManifestEntry) -> Result<K>
where
    K: DeserializeOwned,
{
    Ok(K::deserialize(entry.document()).context(error::TypedDecodeSnafu {
        kind: entry.kind().as_str(),
    })?)
}

async fn create<K>(api: &Api<K>, kind: &ManifestKind, object: K) -> Result<Tracked<K>>
where
    K: Resource + Clone + Debug + DeserializeOwned + Serialize,
{
    let name = object.name_any();
    match api.create(&PostParams::default(), &object).await {
        Ok(created) => {
            info!("Created {} '{}'", kind, name);
            Ok(Tracked::created(created))
        }
        Err(e) if is_already_exists(&e) => {
            warn!("{} '{}' already exists and will be kept on teardown", kind, name);
            Ok(Tracked::kept(object))
        }
        Err(e) => Err(error::CreateSnafu {
            kind: kind.as_str(),
            name,
        }
        .into_error(e)
        .into()),
    }
}

/// Delete a recorded object by name. Objects that are already gone count as deleted.
pub(crate) async fn delete<K>(api: &Api<K>, kind: &str, name: &str) -> Result<()>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    let deleted = api
        .delete(name, &delete_params())
        .await
        .map(|_| ())
        .allow_not_found(|_| debug!("{} '{}' was already deleted", kind, name))
        .context(error::DeleteSnafu { kind, name })?;
    if deleted.is_some() {
        info!("Deleted {} '{}'", kind, name);
    }
    Ok(())
}

/// Delete a CRD recorded during setup.
pub(crate) async fn delete_crd(applier: &DynamicApplier, crd: &CrdManifest) -> Result<()> {
    match applier
        .apply_document(DynamicAction::Delete, crd.document.clone())
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!("CRD '{}' was already deleted", crd.name);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn delete_params() -> DeleteParams {
    DeleteParams {
        grace_period_seconds: Some(1),
        ..DeleteParams::default()
    }
}
