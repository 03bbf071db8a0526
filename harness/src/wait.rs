/*!

Blocking (in the async sense) readiness checks. [`poll`] is the primitive: it re-evaluates a
condition on a fixed interval until the condition is met, the condition fails, or the deadline
passes. The remaining functions are readiness checks for the workloads an operator produces.

!*/

use crate::constants::KIND_DEPLOYMENT;
use crate::error::{self, Error, Result};
use crate::status::AllowNotFound;
use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetStatus, Deployment, DeploymentStatus, StatefulSet, StatefulSetStatus,
};
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use log::{debug, info};
use serde::de::DeserializeOwned;
use snafu::{ensure, ResultExt};
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

/// How a [`poll`] ended when the condition itself did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The condition returned `true`.
    Ready,
    /// The deadline passed while the condition kept returning `false`.
    TimedOut,
}

/// Evaluate `condition` every `interval` until it returns `Ok(true)` or `Err(_)`, or until
/// `timeout` has elapsed. The first evaluation happens immediately. An in-flight evaluation is
/// abandoned when the deadline passes.
pub async fn poll<F, Fut, E>(
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> std::result::Result<PollOutcome, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<bool, E>>,
{
    let polling = async {
        loop {
            match condition().await {
                Ok(true) => return Ok(PollOutcome::Ready),
                Ok(false) => tokio::time::sleep(interval).await,
                Err(e) => return Err(e),
            }
        }
    };
    match tokio::time::timeout(timeout, polling).await {
        Ok(result) => result,
        Err(_) => Ok(PollOutcome::TimedOut),
    }
}

/// A deployment is ready when every replica count matches `target` exactly and nothing is
/// unavailable. More replicas than requested is not ready.
pub fn deployment_ready(status: &DeploymentStatus, target: i32) -> bool {
    status.replicas.unwrap_or_default() == target
        && status.available_replicas.unwrap_or_default() == target
        && status.updated_replicas.unwrap_or_default() == target
        && status.ready_replicas.unwrap_or_default() == target
        && status.unavailable_replicas.unwrap_or_default() == 0
}

/// A stateful set is ready when exactly `target` replicas are ready.
pub fn stateful_set_ready(status: &StatefulSetStatus, target: i32) -> bool {
    status.ready_replicas.unwrap_or_default() == target
}

/// A daemon set is ready when at least `target` pods are ready; the scheduled count depends on
/// the node pool.
pub fn daemon_set_ready(status: &DaemonSetStatus, target: i32) -> bool {
    status.number_ready >= target
}

/// Wait until the deployment `name` reports exactly `replicas` ready replicas. A deployment that
/// does not exist yet is polled until it appears.
pub async fn wait_for_deployment(
    client: &Client,
    namespace: &str,
    name: &str,
    replicas: i32,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let api = &api;
    let outcome = poll::<_, _, Error>(interval, timeout, move || async move {
        let deployment = match get_optional(api, KIND_DEPLOYMENT, name).await? {
            Some(deployment) => deployment,
            None => {
                debug!(
                    "Waiting for availability of {} deployment in {} namespace",
                    name, namespace
                );
                return Ok(false);
            }
        };
        let status = deployment.status.unwrap_or_default();
        debug!(
            "Waiting for full availability of {} deployment (Replicas: {}/{} - Available: {}/{} - Updated: {}/{} - Ready: {}/{} - Unavailable: {}/0)",
            name,
            status.replicas.unwrap_or_default(), replicas,
            status.available_replicas.unwrap_or_default(), replicas,
            status.updated_replicas.unwrap_or_default(), replicas,
            status.ready_replicas.unwrap_or_default(), replicas,
            status.unavailable_replicas.unwrap_or_default(),
        );
        Ok::<_, Error>(deployment_ready(&status, replicas))
    })
    .await?;
    ensure_ready(outcome, format!("deployment '{}'", name), timeout)?;
    info!("Deployment {} available ({}/{})", name, replicas, replicas);
    Ok(())
}

/// Wait until exactly `count` replicas of the stateful set `name` are ready.
pub async fn wait_for_stateful_set(
    client: &Client,
    namespace: &str,
    name: &str,
    count: i32,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let api = &api;
    let outcome = poll::<_, _, Error>(interval, timeout, move || async move {
        let stateful_set = match get_optional(api, "StatefulSet", name).await? {
            Some(stateful_set) => stateful_set,
            None => {
                debug!("Waiting for availability of {} stateful set", name);
                return Ok(false);
            }
        };
        let status = stateful_set.status.unwrap_or_default();
        debug!(
            "Waiting for full availability of {} stateful set ({}/{})",
            name,
            status.ready_replicas.unwrap_or_default(),
            count
        );
        Ok::<_, Error>(stateful_set_ready(&status, count))
    })
    .await?;
    ensure_ready(outcome, format!("stateful set '{}'", name), timeout)?;
    info!("Statefulset {} ready ({})", name, count);
    Ok(())
}

/// Wait until the stateful set `name` exists, regardless of its readiness.
pub async fn wait_for_stateful_set_creation(
    client: &Client,
    namespace: &str,
    name: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    wait_for_creation(&api, "StatefulSet", name, interval, timeout).await?;
    info!("Statefulset {} created", name);
    Ok(())
}

/// Wait until at least `count` pods of the daemon set `name` are ready.
pub async fn wait_for_daemon_set(
    client: &Client,
    namespace: &str,
    name: &str,
    count: i32,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let api: Api<DaemonSet> = Api::namespaced(client.clone(), namespace);
    let api = &api;
    let outcome = poll::<_, _, Error>(interval, timeout, move || async move {
        let daemon_set = match get_optional(api, "DaemonSet", name).await? {
            Some(daemon_set) => daemon_set,
            None => {
                debug!("Waiting for availability of {} daemon set", name);
                return Ok(false);
            }
        };
        let status = daemon_set.status.unwrap_or_default();
        debug!(
            "Waiting for full availability of {} daemonset ({}/{})",
            name, status.number_ready, count
        );
        Ok::<_, Error>(daemon_set_ready(&status, count))
    })
    .await?;
    ensure_ready(outcome, format!("daemon set '{}'", name), timeout)?;
    info!("Daemonset {} ready ({})", name, count);
    Ok(())
}

/// Wait until `get(name)` on `api` returns `NOT_FOUND`. `kind` is only used for messages.
pub async fn wait_for_deletion<K>(
    api: &Api<K>,
    kind: &str,
    name: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    let outcome = poll::<_, _, Error>(interval, timeout, move || async move {
        let present = get_optional(api, kind, name).await?.is_some();
        if present {
            debug!("Waiting for {} {} to be deleted", kind, name);
        }
        Ok::<_, Error>(!present)
    })
    .await?;
    ensure_ready(outcome, format!("deletion of {} '{}'", kind, name), timeout)?;
    info!("{} {} was deleted", kind, name);
    Ok(())
}

/// Wait until the deployment `name` no longer exists.
pub async fn wait_for_deployment_deleted(
    client: &Client,
    namespace: &str,
    name: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    wait_for_deletion(&api, KIND_DEPLOYMENT, name, interval, timeout).await
}

/// Wait until the service `name` exists and return it.
pub async fn wait_for_service(
    client: &Client,
    namespace: &str,
    name: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<Service> {
    let api: Api<Service> = Api::namespaced(client.clone(), namespace);
    wait_for_creation(&api, "Service", name, interval, timeout).await?;
    api.get(name)
        .await
        .context(error::GetSnafu {
            kind: "Service",
            name,
        })
        .map_err(Into::into)
}

async fn wait_for_creation<K>(
    api: &Api<K>,
    kind: &str,
    name: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    let outcome = poll::<_, _, Error>(interval, timeout, move || async move {
        let present = get_optional(api, kind, name).await?.is_some();
        if !present {
            debug!("Waiting for availability of {} {}", kind, name);
        }
        Ok::<_, Error>(present)
    })
    .await?;
    ensure_ready(outcome, format!("creation of {} '{}'", kind, name), timeout)
}

/// `get` that treats `NOT_FOUND` as `None`. Every other failure is fatal to the wait.
async fn get_optional<K>(api: &Api<K>, kind: &str, name: &str) -> Result<Option<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    Ok(api
        .get(name)
        .await
        .allow_not_found(|_| ())
        .context(error::GetSnafu { kind, name })?)
}

fn ensure_ready(outcome: PollOutcome, what: String, timeout: Duration) -> Result<()> {
    ensure!(
        outcome == PollOutcome::Ready,
        error::TimeoutSnafu { what, timeout }
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{MockApiServer, Reply};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const FAST: Duration = Duration::from_millis(10);
    const SHORT: Duration = Duration::from_millis(200);

    fn deployment_status(
        replicas: i32,
        available: i32,
        updated: i32,
        ready: i32,
        unavailable: i32,
    ) -> DeploymentStatus {
        DeploymentStatus {
            replicas: Some(replicas),
            available_replicas: Some(available),
            updated_replicas: Some(updated),
            ready_replicas: Some(ready),
            unavailable_replicas: Some(unavailable),
            ..Default::default()
        }
    }

    #[test]
    fn deployment_exact_match_is_ready() {
        assert!(deployment_ready(&deployment_status(3, 3, 3, 3, 0), 3));
    }

    #[test]
    fn deployment_any_mismatch_is_not_ready() {
        assert!(!deployment_ready(&deployment_status(4, 3, 3, 3, 0), 3));
        assert!(!deployment_ready(&deployment_status(3, 2, 3, 3, 0), 3));
        assert!(!deployment_ready(&deployment_status(3, 3, 2, 3, 0), 3));
        assert!(!deployment_ready(&deployment_status(3, 3, 3, 4, 0), 3));
        assert!(!deployment_ready(&deployment_status(3, 3, 3, 3, 1), 3));
    }

    #[test]
    fn deployment_without_status_is_not_ready() {
        assert!(!deployment_ready(&DeploymentStatus::default(), 1));
    }

    #[test]
    fn daemon_set_is_a_threshold() {
        let status = |number_ready| DaemonSetStatus {
            number_ready,
            ..Default::default()
        };
        assert!(daemon_set_ready(&status(5), 3));
        assert!(daemon_set_ready(&status(3), 3));
        assert!(!daemon_set_ready(&status(2), 3));
    }

    #[test]
    fn stateful_set_is_exact() {
        let status = |ready| StatefulSetStatus {
            ready_replicas: Some(ready),
            ..Default::default()
        };
        assert!(stateful_set_ready(&status(2), 2));
        assert!(!stateful_set_ready(&status(3), 2));
        assert!(!stateful_set_ready(&status(1), 2));
    }

    #[tokio::test]
    async fn poll_succeeds_once_condition_holds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let outcome = poll(FAST, Duration::from_secs(5), move || {
            let counter = counter.clone();
            async move { Ok::<_, std::io::Error>(counter.fetch_add(1, Ordering::SeqCst) >= 2) }
        })
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_times_out() {
        let outcome = poll(FAST, Duration::from_millis(50), || async {
            Ok::<_, std::io::Error>(false)
        })
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::TimedOut);
    }

    #[tokio::test]
    async fn poll_stops_on_condition_error() {
        let result = poll(FAST, Duration::from_secs(5), || async {
            Err::<bool, _>(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_deployment_keeps_polling_until_deadline() {
        let server = MockApiServer::new();
        let client = server.client("ns-a");
        let err = wait_for_deployment(&client, "ns-a", "op", 1, FAST, SHORT)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        // More than one attempt means the 404 did not end the wait.
        let gets = server
            .requests()
            .iter()
            .filter(|r| r.method == "GET")
            .count();
        assert!(gets > 1);
    }

    #[tokio::test]
    async fn deployment_becomes_ready() {
        let server = MockApiServer::new();
        let path = "/apis/apps/v1/namespaces/ns-a/deployments/op";
        server.on("GET", path, Reply::not_found("deployments", "op"));
        server.on(
            "GET",
            path,
            Reply::json(
                200,
                json!({
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "metadata": { "name": "op", "namespace": "ns-a" },
                    "spec": { "selector": {}, "template": {} },
                    "status": {
                        "replicas": 1,
                        "availableReplicas": 1,
                        "updatedReplicas": 1,
                        "readyReplicas": 1
                    }
                }),
            ),
        );
        let client = server.client("ns-a");
        wait_for_deployment(&client, "ns-a", "op", 1, FAST, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn forbidden_fetch_is_fatal() {
        let server = MockApiServer::new();
        server.on(
            "GET",
            "/apis/apps/v1/namespaces/ns-a/daemonsets/agent",
            Reply::status(403, "Forbidden", "daemonsets.apps \"agent\" is forbidden"),
        );
        let client = server.client("ns-a");
        let err = wait_for_daemon_set(&client, "ns-a", "agent", 1, FAST, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn deletion_finishes_on_not_found() {
        let server = MockApiServer::new();
        let client = server.client("ns-a");
        wait_for_deployment_deleted(&client, "ns-a", "op", FAST, SHORT)
            .await
            .unwrap();
    }
}
