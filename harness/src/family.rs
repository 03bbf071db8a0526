use crate::manifest::ManifestSource;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::{Display, Formatter};

const ROUTER_DEPLOY_URL: &str =
    "https://raw.githubusercontent.com/interconnectedcloud/qdr-operator/master/deploy/";
const ROUTER_MANIFESTS: &[&str] = &[
    "service_account.yaml",
    "role.yaml",
    "role_binding.yaml",
    "cluster_role.yaml",
    "cluster_role_binding.yaml",
    "crds/interconnectedcloud_v1alpha1_interconnect_crd.yaml",
    "operator.yaml",
];
const ROUTER_GROUP: &str = "interconnectedcloud.github.io";
const ROUTER_VERSION: &str = "v1alpha1";
const ROUTER_CRDS: &[&str] = &["interconnects.interconnectedcloud.github.io"];

const BROKER_NAME: &str = "broker-operator";
const BROKER_IMAGE: &str = "quay.io/artemiscloud/activemq-artemis-operator";
const BROKER_GROUP: &str = "broker.amq.io";
const BROKER_VERSION: &str = "v2alpha1";
/// (kind, plural) of each broker custom resource.
const BROKER_KINDS: &[(&str, &str)] = &[
    ("ActiveMQArtemisAddress", "activemqartemisaddresses"),
    ("ActiveMQArtemis", "activemqartemises"),
    ("ActiveMQArtemisScaledown", "activemqartemisscaledowns"),
];

/// The kind of operator being provisioned. A family only supplies defaults for settings the
/// caller did not provide; provisioning itself is the same for every family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperatorFamily {
    /// No defaults. Namespace and manifests must be supplied.
    #[default]
    Generic,
    /// ActiveMQ Artemis broker operator. Its default manifests are generated: RBAC, the broker
    /// CRDs and the operator deployment.
    Broker,
    /// Qpid Dispatch router (interconnect) operator.
    Router,
}

impl OperatorFamily {
    pub fn default_name(&self) -> Option<&'static str> {
        match self {
            OperatorFamily::Broker => Some(BROKER_NAME),
            OperatorFamily::Generic | OperatorFamily::Router => None,
        }
    }

    pub fn default_image(&self) -> Option<&'static str> {
        match self {
            OperatorFamily::Broker => Some(BROKER_IMAGE),
            OperatorFamily::Generic | OperatorFamily::Router => None,
        }
    }

    pub fn default_api_version(&self) -> Option<&'static str> {
        match self {
            OperatorFamily::Generic => None,
            OperatorFamily::Broker => Some(BROKER_VERSION),
            OperatorFamily::Router => Some(ROUTER_VERSION),
        }
    }

    pub fn group_name(&self) -> Option<&'static str> {
        match self {
            OperatorFamily::Generic => None,
            OperatorFamily::Broker => Some(BROKER_GROUP),
            OperatorFamily::Router => Some(ROUTER_GROUP),
        }
    }

    pub fn crd_names(&self) -> Vec<String> {
        match self {
            OperatorFamily::Generic => Vec::new(),
            OperatorFamily::Broker => BROKER_KINDS
                .iter()
                .map(|(_, plural)| format!("{}.{}", plural, BROKER_GROUP))
                .collect(),
            OperatorFamily::Router => ROUTER_CRDS.iter().map(|name| name.to_string()).collect(),
        }
    }

    /// The manifests used when the caller supplies none. `namespace` is where the operator runs;
    /// generated cluster role bindings grant it to the operator service account there.
    pub fn default_manifests(&self, namespace: &str) -> Option<ManifestSource> {
        match self {
            OperatorFamily::Generic => None,
            OperatorFamily::Broker => Some(ManifestSource::Buffers(broker_manifests(namespace))),
            OperatorFamily::Router => Some(ManifestSource::Locations(
                ROUTER_MANIFESTS
                    .iter()
                    .map(|file| format!("{}{}", ROUTER_DEPLOY_URL, file))
                    .collect(),
            )),
        }
    }
}

impl Display for OperatorFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorFamily::Generic => f.write_str("generic"),
            OperatorFamily::Broker => f.write_str("broker"),
            OperatorFamily::Router => f.write_str("router"),
        }
    }
}

/// Everything the broker operator needs, in creation order: service account, role, cluster role,
/// role binding, cluster role binding, CRDs, then the operator deployment.
fn broker_manifests(namespace: &str) -> Vec<Bytes> {
    let mut manifests = vec![
        document(json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": { "name": BROKER_NAME },
        })),
        document(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "Role",
            "metadata": { "name": BROKER_NAME },
            "rules": broker_rules(),
        })),
        document(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRole",
            "metadata": { "name": BROKER_NAME },
            "rules": broker_rules(),
        })),
        document(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "RoleBinding",
            "metadata": { "name": BROKER_NAME },
            "subjects": [{ "kind": "ServiceAccount", "name": BROKER_NAME }],
            "roleRef": {
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "Role",
                "name": BROKER_NAME,
            },
        })),
        document(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRoleBinding",
            "metadata": { "name": BROKER_NAME },
            "subjects": [{
                "kind": "ServiceAccount",
                "name": BROKER_NAME,
                "namespace": namespace,
            }],
            "roleRef": {
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "ClusterRole",
                "name": BROKER_NAME,
            },
        })),
    ];
    manifests.extend(
        BROKER_KINDS
            .iter()
            .map(|(kind, plural)| broker_crd(kind, plural)),
    );
    manifests.push(broker_deployment());
    manifests
}

fn broker_rules() -> Value {
    json!([
        {
            "apiGroups": [""],
            "resources": [
                "pods", "services", "endpoints", "persistentvolumeclaims", "events",
                "configmaps", "secrets", "routes"
            ],
            "verbs": ["*"],
        },
        {
            "apiGroups": ["apps"],
            "resources": ["deployments", "daemonsets", "replicasets", "statefulsets"],
            "verbs": ["*"],
        },
        {
            "apiGroups": [BROKER_GROUP],
            "resources": ["*"],
            "verbs": ["*"],
        },
    ])
}

fn broker_deployment() -> Bytes {
    document(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": BROKER_NAME },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "name": BROKER_NAME } },
            "template": {
                "metadata": { "labels": { "name": BROKER_NAME } },
                "spec": {
                    "serviceAccountName": BROKER_NAME,
                    "containers": [{
                        "name": BROKER_NAME,
                        "image": BROKER_IMAGE,
                        "imagePullPolicy": "Always",
                        "env": [
                            {
                                "name": "WATCH_NAMESPACE",
                                "valueFrom": { "fieldRef": { "fieldPath": "metadata.namespace" } },
                            },
                            {
                                "name": "POD_NAME",
                                "valueFrom": { "fieldRef": { "fieldPath": "metadata.name" } },
                            },
                            { "name": "OPERATOR_NAME", "value": BROKER_NAME },
                        ],
                    }],
                },
            },
        },
    }))
}

fn document(value: Value) -> Bytes {
    Bytes::from(value.to_string())
}

/// A namespaced CRD for one of the broker kinds. The schema accepts any fields.
fn broker_crd(kind: &str, plural: &str) -> Bytes {
    let crd = json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": { "name": format!("{}.{}", plural, BROKER_GROUP) },
        "spec": {
            "group": BROKER_GROUP,
            "names": {
                "kind": kind,
                "listKind": format!("{}List", kind),
                "plural": plural,
                "singular": kind.to_lowercase(),
            },
            "scope": "Namespaced",
            "versions": [{
                "name": BROKER_VERSION,
                "served": true,
                "storage": true,
                "schema": {
                    "openAPIV3Schema": {
                        "type": "object",
                        "x-kubernetes-preserve-unknown-fields": true,
                    }
                },
                "subresources": { "status": {} },
            }],
        }
    });
    document(crd)
}
