use crate::constants::{RETRY_INTERVAL, SETTINGS_ENV_PREFIX, TIMEOUT};
use crate::error::{self, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::Deserialize;
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides read from `HARNESS_`-prefixed environment variables. Every field is optional.
///
/// # Example
///
/// ```text
/// HARNESS_KUBECONFIG=/tmp/kubeconfig.yaml
/// HARNESS_OPERATOR_IMAGE=quay.io/interconnectedcloud/qdr-operator:1.4.0
/// HARNESS_GLOBAL_OPERATOR=true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// Kubeconfig used by [`client`](Self::client). Without it the client is inferred from the
    /// environment.
    pub kubeconfig: Option<PathBuf>,
    pub operator_image: Option<String>,
    pub operator_command: Option<String>,
    #[serde(default)]
    pub global_operator: bool,
    #[serde(default)]
    pub admin_unavailable: bool,
    #[serde(default = "retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            operator_image: None,
            operator_command: None,
            global_operator: false,
            admin_unavailable: false,
            retry_interval_secs: retry_interval_secs(),
            timeout_secs: timeout_secs(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(envy::prefixed(SETTINGS_ENV_PREFIX)
            .from_env::<Self>()
            .context(error::InvalidSettingsSnafu)?)
    }

    /// Read settings from `(name, value)` pairs, using the same names as the environment.
    pub fn from_iter<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(SETTINGS_ENV_PREFIX)
            .from_iter::<_, Self>(vars)
            .context(error::InvalidSettingsSnafu)?)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Create a client from the configured kubeconfig, or the inferred default.
    pub async fn client(&self) -> Result<Client> {
        match &self.kubeconfig {
            Some(path) => client_from_kubeconfig(path).await,
            None => Ok(Client::try_default()
                .await
                .context(error::ClientCreateSnafu)?),
        }
    }
}

fn retry_interval_secs() -> u64 {
    RETRY_INTERVAL.as_secs()
}

fn timeout_secs() -> u64 {
    TIMEOUT.as_secs()
}

/// Create a client from the kubeconfig file at `path`.
pub async fn client_from_kubeconfig(path: &Path) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(path).context(error::ConfigReadSnafu { path })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context(error::ClientCreateKubeconfigSnafu)?;
    Ok(Client::try_from(config).context(error::ClientCreateSnafu)?)
}
