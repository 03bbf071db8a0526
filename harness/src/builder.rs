use crate::error::{self, Result};
use crate::family::OperatorFamily;
use crate::manifest::ManifestSource;
use crate::operator::Operator;
use crate::settings::Settings;
use bytes::Bytes;
use kube::Client;
use log::debug;
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};

/// Which provisioned resources teardown may delete after setup met objects that already existed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OwnershipPolicy {
    /// Each recorded resource is deleted only if this instance created it.
    #[default]
    PerResource,
    /// Any resource that already existed, or a request to keep cluster resources, turns both
    /// teardowns into no-ops for the whole instance.
    InstanceWide,
}

/// Everything an [`Operator`] needs before it touches the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningConfig {
    pub(crate) namespace: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) image: Option<String>,
    pub(crate) command: Option<String>,
    pub(crate) manifests: Option<ManifestSource>,
    pub(crate) api_version: Option<String>,
    pub(crate) admin_unavailable: bool,
    pub(crate) keep_cluster_resources: bool,
    pub(crate) global_operator: bool,
    pub(crate) ownership: OwnershipPolicy,
}

impl ProvisioningConfig {
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn manifests(&self) -> Option<&ManifestSource> {
        self.manifests.as_ref()
    }

    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    pub fn admin_unavailable(&self) -> bool {
        self.admin_unavailable
    }

    pub fn keep_cluster_resources(&self) -> bool {
        self.keep_cluster_resources
    }

    pub fn global_operator(&self) -> bool {
        self.global_operator
    }

    pub fn ownership(&self) -> OwnershipPolicy {
        self.ownership
    }

    /// Fill unset values from the family defaults.
    fn with_family_defaults(mut self, family: OperatorFamily) -> Self {
        if self.name.is_none() {
            self.name = family.default_name().map(String::from);
        }
        if self.image.is_none() {
            self.image = family.default_image().map(String::from);
        }
        if self.api_version.is_none() {
            self.api_version = family.default_api_version().map(String::from);
        }
        if self.manifests.is_none() {
            let namespace = self.namespace.as_deref().unwrap_or_default();
            self.manifests = family.default_manifests(namespace);
        }
        self
    }
}

/// Collects the configuration of an [`Operator`]. Every setter fails once the builder has been
/// finalized, and none of them contact the cluster.
///
/// ```no_run
/// # async fn run(client: kube::Client) -> harness::Result<()> {
/// use harness::{OperatorBuilder, OperatorFamily};
///
/// let operator = OperatorBuilder::new(OperatorFamily::Router)
///     .namespace("test-ns")?
///     .image("quay.io/interconnectedcloud/qdr-operator:latest")?
///     .build(client)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct OperatorBuilder {
    family: OperatorFamily,
    config: ProvisioningConfig,
    finalized: bool,
}

impl OperatorBuilder {
    pub fn new(family: OperatorFamily) -> Self {
        Self {
            family,
            ..Self::default()
        }
    }

    fn edit<F>(mut self, setting: &str, f: F) -> Result<Self>
    where
        F: FnOnce(&mut ProvisioningConfig),
    {
        ensure!(!self.finalized, error::FinalizedSnafu { setting });
        f(&mut self.config);
        debug!("Set '{}' for {} operator", setting, self.family);
        Ok(self)
    }

    pub fn namespace<S>(self, namespace: S) -> Result<Self>
    where
        S: Into<String>,
    {
        let namespace = non_empty(namespace);
        self.edit("namespace", |c| c.namespace = namespace)
    }

    /// Image for the first container of the operator deployment.
    pub fn image<S>(self, image: S) -> Result<Self>
    where
        S: Into<String>,
    {
        let image = non_empty(image);
        self.edit("image", |c| c.image = image)
    }

    /// Command for the first container of the operator deployment.
    pub fn command<S>(self, command: S) -> Result<Self>
    where
        S: Into<String>,
    {
        let command = non_empty(command);
        self.edit("command", |c| c.command = command)
    }

    /// Name given to the operator deployment.
    pub fn operator_name<S>(self, name: S) -> Result<Self>
    where
        S: Into<String>,
    {
        let name = non_empty(name);
        self.edit("operator name", |c| c.name = name)
    }

    /// Replaces any manifest source set earlier.
    pub fn manifest_urls<I, S>(self, locations: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let locations = locations.into_iter().map(Into::into).collect();
        self.edit("manifest urls", |c| {
            c.manifests = Some(ManifestSource::Locations(locations))
        })
    }

    /// Appends to the manifest locations. Buffers set earlier are replaced.
    pub fn add_manifest_url<S>(self, location: S) -> Result<Self>
    where
        S: Into<String>,
    {
        let location = location.into();
        self.edit("manifest urls", |c| match &mut c.manifests {
            Some(ManifestSource::Locations(locations)) => locations.push(location),
            _ => c.manifests = Some(ManifestSource::Locations(vec![location])),
        })
    }

    /// Replaces any manifest source set earlier.
    pub fn manifest_buffers<I, B>(self, buffers: I) -> Result<Self>
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let buffers = buffers.into_iter().map(Into::into).collect();
        self.edit("manifest buffers", |c| {
            c.manifests = Some(ManifestSource::Buffers(buffers))
        })
    }

    pub fn api_version<S>(self, api_version: S) -> Result<Self>
    where
        S: Into<String>,
    {
        let api_version = non_empty(api_version);
        self.edit("api version", |c| c.api_version = api_version)
    }

    /// Leave cluster-scoped resources and CRDs in place on suite teardown.
    pub fn keep_cluster_resources(self, keep: bool) -> Result<Self> {
        self.edit("keep cluster resources", |c| c.keep_cluster_resources = keep)
    }

    /// Cluster-admin resources are provisioned by someone else: CRDs are neither created nor
    /// deleted, and cluster resources are kept on teardown.
    pub fn admin_unavailable(self) -> Result<Self> {
        self.edit("admin unavailable", |c| c.admin_unavailable = true)
    }

    /// The operator watches every namespace instead of its own.
    pub fn global_operator(self) -> Result<Self> {
        self.edit("global operator", |c| c.global_operator = true)
    }

    pub fn ownership_policy(self, policy: OwnershipPolicy) -> Result<Self> {
        self.edit("ownership policy", |c| c.ownership = policy)
    }

    /// Apply the overrides present in `settings`. Settings that are unset leave the builder as is.
    pub fn with_settings(self, settings: &Settings) -> Result<Self> {
        let mut builder = self;
        if let Some(image) = settings.operator_image.clone() {
            builder = builder.image(image)?;
        }
        if let Some(command) = settings.operator_command.clone() {
            builder = builder.command(command)?;
        }
        if settings.global_operator {
            builder = builder.global_operator()?;
        }
        if settings.admin_unavailable {
            builder = builder.admin_unavailable()?;
        }
        Ok(builder)
    }

    /// Lock the configuration. Setters called afterwards fail with a configuration error.
    pub fn finalize(mut self) -> Self {
        self.finalized = true;
        self
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn family(&self) -> OperatorFamily {
        self.family
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// Finalize and create the [`Operator`] without running setup. Use this when resources created
    /// by a failed setup must still be torn down.
    pub fn prepare(self, client: Client) -> Result<Operator> {
        let builder = self.finalize();
        let config = builder.config.with_family_defaults(builder.family);
        Operator::new(client, builder.family, config)
    }

    /// Finalize, create the [`Operator`] and run its setup. A failed setup returns only the error.
    pub async fn build(self, client: Client) -> Result<Operator> {
        let mut operator = self.prepare(client)?;
        operator.setup().await?;
        Ok(operator)
    }

    /// Like [`build`](Self::build), constructing the client from `config` first.
    pub async fn build_with_config(self, config: kube::Config) -> Result<Operator> {
        let client = Client::try_from(config).context(error::ClientCreateSnafu)?;
        self.build(client).await
    }
}

fn non_empty<S>(value: S) -> Option<String>
where
    S: Into<String>,
{
    Some(value.into()).filter(|value| !value.is_empty())
}
