use crate::builder::{OwnershipPolicy, ProvisioningConfig};
use crate::constants::{
    KIND_CLUSTER_ROLE, KIND_CLUSTER_ROLE_BINDING, KIND_DEPLOYMENT, KIND_ROLE, KIND_ROLE_BINDING,
    KIND_SERVICE_ACCOUNT,
};
use crate::dynamic::{DynamicAction, DynamicApplier};
use crate::error::{self, Result};
use crate::family::OperatorFamily;
use crate::manifest::{load, ManifestEntry, ManifestSource};
use crate::typed::{delete, delete_crd, DeploymentPatches, Provisioned, TypedHandlers};
use crate::wait::wait_for_deployment;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{DynamicObject, PostParams};
use kube::{Api, Client};
use log::{info, warn};
use snafu::{OptionExt, ResultExt};
use std::time::Duration;

/// Where an [`Operator`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unprovisioned,
    Provisioned,
    TornDown,
}

/// An operator provisioned from manifests into one namespace. Built by
/// [`OperatorBuilder`](crate::OperatorBuilder).
///
/// Setup records every object it creates or finds. Teardown deletes by those records. Objects that
/// already existed before setup are left in place, as decided by the [`OwnershipPolicy`].
pub struct Operator {
    client: Client,
    family: OperatorFamily,
    config: ProvisioningConfig,
    namespace: String,
    /// Set when any create returned "already exists". Never reset.
    keeps_resources: bool,
    state: LifecycleState,
    provisioned: Provisioned,
}

impl Operator {
    pub(crate) fn new(
        client: Client,
        family: OperatorFamily,
        config: ProvisioningConfig,
    ) -> Result<Self> {
        let namespace = config
            .namespace
            .clone()
            .context(error::MissingNamespaceSnafu)?;
        Ok(Self {
            client,
            family,
            config,
            namespace,
            keeps_resources: false,
            state: LifecycleState::Unprovisioned,
            provisioned: Provisioned::default(),
        })
    }

    /// Create every object in the manifest set, in order. Objects that already exist are recorded
    /// as not owned and setup continues. Any other failure stops setup; objects created before it
    /// stay recorded so a teardown can remove them.
    pub async fn setup(&mut self) -> Result<()> {
        let source = self
            .config
            .manifests
            .as_ref()
            .context(error::ManifestSourceMissingSnafu {
                name: self.display_name(),
            })?;
        let entries = source
            .documents()
            .await?
            .into_iter()
            .map(ManifestEntry::from_value)
            .collect::<Result<Vec<_>>>()?;

        let patches = DeploymentPatches {
            image: self.config.image.clone(),
            command: self.config.command.clone(),
            name: self.config.name.clone(),
            global: self.config.global_operator,
        };
        let handlers = TypedHandlers {
            client: &self.client,
            namespace: &self.namespace,
            patches: &patches,
            skip_crds: self.config.admin_unavailable,
        };
        for entry in entries {
            let handled = handlers.handle(entry).await?;
            if handled.already_existed() && !self.keeps_resources {
                info!(
                    "Resources in namespace '{}' existed before setup and will be kept",
                    self.namespace
                );
                self.keeps_resources = true;
            }
            self.provisioned.record(handled);
        }

        if self.config.name.is_none() {
            self.config.name = self.provisioned.deployment().map(|d| d.name());
        }
        self.state = LifecycleState::Provisioned;
        info!(
            "Finished setting up {} operator in namespace '{}'",
            self.family, self.namespace
        );
        Ok(())
    }

    /// Delete the namespace-scoped objects recorded during setup: deployments, role bindings, roles
    /// and service accounts. Objects that are already gone are not an error.
    pub async fn teardown_each(&mut self) -> Result<()> {
        if self.keeps_everything() {
            info!(
                "Keeping resources in namespace '{}' on teardown",
                self.namespace
            );
            self.state = LifecycleState::TornDown;
            return Ok(());
        }
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        for tracked in self.provisioned.deployments().iter().rev() {
            if tracked.owned() {
                delete(&deployments, KIND_DEPLOYMENT, &tracked.name()).await?;
            }
        }
        let role_bindings: Api<RoleBinding> =
            Api::namespaced(self.client.clone(), &self.namespace);
        for tracked in self.provisioned.role_bindings().iter().rev() {
            if tracked.owned() {
                delete(&role_bindings, KIND_ROLE_BINDING, &tracked.name()).await?;
            }
        }
        let roles: Api<Role> = Api::namespaced(self.client.clone(), &self.namespace);
        for tracked in self.provisioned.roles().iter().rev() {
            if tracked.owned() {
                delete(&roles, KIND_ROLE, &tracked.name()).await?;
            }
        }
        let service_accounts: Api<ServiceAccount> =
            Api::namespaced(self.client.clone(), &self.namespace);
        for tracked in self.provisioned.service_accounts().iter().rev() {
            if tracked.owned() {
                delete(&service_accounts, KIND_SERVICE_ACCOUNT, &tracked.name()).await?;
            }
        }
        self.state = LifecycleState::TornDown;
        info!("Teardown of namespace '{}' successful", self.namespace);
        Ok(())
    }

    /// Delete the cluster-scoped objects and CRDs recorded during setup. Call once, after every
    /// [`teardown_each`](Self::teardown_each) against the same cluster.
    pub async fn teardown_suite(&mut self) -> Result<()> {
        if self.keeps_everything() || self.keeps_cluster_resources() {
            info!(
                "Keeping cluster resources of {} operator on teardown",
                self.family
            );
            self.state = LifecycleState::TornDown;
            return Ok(());
        }
        let cluster_role_bindings: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        for tracked in self.provisioned.cluster_role_bindings().iter().rev() {
            if tracked.owned() {
                delete(
                    &cluster_role_bindings,
                    KIND_CLUSTER_ROLE_BINDING,
                    &tracked.name(),
                )
                .await?;
            }
        }
        let cluster_roles: Api<ClusterRole> = Api::all(self.client.clone());
        for tracked in self.provisioned.cluster_roles().iter().rev() {
            if tracked.owned() {
                delete(&cluster_roles, KIND_CLUSTER_ROLE, &tracked.name()).await?;
            }
        }
        let applier = self.applier();
        for crd in self.provisioned.crds().iter().rev() {
            if crd.owned() {
                delete_crd(&applier, crd).await?;
            }
        }
        self.state = LifecycleState::TornDown;
        info!("Teardown of {} operator suite successful", self.family);
        Ok(())
    }

    /// Both teardowns are skipped for the whole instance.
    fn keeps_everything(&self) -> bool {
        match self.config.ownership {
            OwnershipPolicy::PerResource => false,
            OwnershipPolicy::InstanceWide => {
                self.keeps_resources || self.keeps_cluster_resources()
            }
        }
    }

    fn keeps_cluster_resources(&self) -> bool {
        self.config.keep_cluster_resources || self.config.admin_unavailable
    }

    fn applier(&self) -> DynamicApplier {
        DynamicApplier::new(self.client.clone(), &self.namespace)
    }

    /// Create every document in `data` through discovery, whatever its kind.
    pub async fn create_resources_from_yaml_bytes(
        &self,
        data: &[u8],
    ) -> Result<Vec<DynamicObject>> {
        self.applier().apply(DynamicAction::Create, data).await
    }

    /// Delete every document in `data` through discovery, whatever its kind.
    pub async fn delete_resources_from_yaml_bytes(
        &self,
        data: &[u8],
    ) -> Result<Vec<DynamicObject>> {
        self.applier().apply(DynamicAction::Delete, data).await
    }

    /// Create everything in the manifest at `location`, a URL or a file path.
    pub async fn create_resources_from_yaml(&self, location: &str) -> Result<Vec<DynamicObject>> {
        let data = load(location).await?;
        self.create_resources_from_yaml_bytes(&data).await
    }

    fn deployment_name(&self) -> Result<String> {
        Ok(self
            .provisioned
            .deployment()
            .map(|d| d.name())
            .or_else(|| self.config.name.clone())
            .context(error::NoDeploymentSnafu {
                name: self.display_name(),
            })?)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Read the operator deployment from the cluster.
    pub async fn deployment(&self) -> Result<Deployment> {
        let name = self.deployment_name()?;
        let deployment = self
            .deployments()
            .get(&name)
            .await
            .context(error::GetSnafu {
                kind: KIND_DEPLOYMENT,
                name: &name,
            })?;
        Ok(deployment)
    }

    /// Replace the operator deployment with `deployment`.
    pub async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let name = self.deployment_name()?;
        let updated = self
            .deployments()
            .replace(&name, &PostParams::default(), deployment)
            .await
            .context(error::UpdateSnafu {
                kind: KIND_DEPLOYMENT,
                name: &name,
            })?;
        info!("Updated deployment '{}'", name);
        Ok(updated)
    }

    /// Delete the operator deployment, leaving every other resource in place.
    pub async fn delete_operator(&self) -> Result<()> {
        let name = self.deployment_name()?;
        delete(&self.deployments(), KIND_DEPLOYMENT, &name).await
    }

    /// Wait until the operator deployment has one fully available replica.
    pub async fn wait_until_ready(&self, interval: Duration, timeout: Duration) -> Result<()> {
        let name = self.deployment_name()?;
        wait_for_deployment(&self.client, &self.namespace, &name, 1, interval, timeout).await
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The operator name: the configured or family default name, or the deployment name once setup
    /// has run.
    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    pub fn image(&self) -> Option<&str> {
        self.config.image.as_deref()
    }

    pub fn api_version(&self) -> Option<&str> {
        self.config.api_version.as_deref()
    }

    pub fn group_name(&self) -> Option<&str> {
        self.family.group_name()
    }

    /// The family's CRD names, or the names of the CRDs found in the manifests.
    pub fn crd_names(&self) -> Vec<String> {
        let names = self.family.crd_names();
        if names.is_empty() {
            self.provisioned
                .crds()
                .iter()
                .map(|crd| crd.name().to_string())
                .collect()
        } else {
            names
        }
    }

    pub fn family(&self) -> OperatorFamily {
        self.family
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    pub fn manifests(&self) -> Option<&ManifestSource> {
        self.config.manifests.as_ref()
    }

    pub fn provisioned(&self) -> &Provisioned {
        &self.provisioned
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// `true` once any create during setup found its object already present.
    pub fn keeps_resources(&self) -> bool {
        self.keeps_resources
    }

    fn display_name(&self) -> String {
        match self.config.name.as_deref() {
            Some(name) => name.to_string(),
            None => format!("{} operator in {}", self.family, self.namespace),
        }
    }
}

impl Drop for Operator {
    fn drop(&mut self) {
        if self.state == LifecycleState::Provisioned {
            warn!(
                "{} operator in namespace '{}' dropped without teardown",
                self.family, self.namespace
            );
        }
    }
}
