use crate::error::{self, Result};
use crate::manifest::{load, split_documents};
use kube::api::{DeleteParams, DynamicObject, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{pinned_kind, Scope};
use kube::{Api, Client, ResourceExt};
use log::{debug, info};
use serde_json::Value;
use snafu::{IntoError, OptionExt, ResultExt};

/// What to do with each document handed to the [`DynamicApplier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicAction {
    Create,
    Delete,
}

impl DynamicAction {
    fn verb(&self) -> &'static str {
        match self {
            DynamicAction::Create => "creating",
            DynamicAction::Delete => "deleting",
        }
    }
}

/// Creates or deletes objects of any kind the cluster serves, without compile-time knowledge of
/// their type. The REST resource and its scope are looked up with discovery for every document,
/// so custom resources and version-dependent kinds work the same as built-in ones.
#[derive(Clone)]
pub struct DynamicApplier {
    client: Client,
    namespace: String,
}

impl DynamicApplier {
    /// Namespaced objects without a namespace of their own are placed in `namespace`.
    pub fn new<S>(client: Client, namespace: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Apply `action` to every document in `data`, in order. The first failure stops the call.
    /// Returns the objects the server returned for creates, or the requested objects for deletes.
    pub async fn apply(&self, action: DynamicAction, data: &[u8]) -> Result<Vec<DynamicObject>> {
        let mut objects = Vec::new();
        for document in split_documents(data)? {
            objects.push(self.apply_document(action, document).await?);
        }
        Ok(objects)
    }

    /// Load the manifest at `location` (URL or file path) and create everything in it.
    pub async fn create_from_location(&self, location: &str) -> Result<Vec<DynamicObject>> {
        let data = load(location).await?;
        self.apply(DynamicAction::Create, &data).await
    }

    /// Apply `action` to a single decoded document.
    pub async fn apply_document(
        &self,
        action: DynamicAction,
        document: Value,
    ) -> Result<DynamicObject> {
        let mut object: DynamicObject =
            serde_json::from_value(document).context(error::TypedDecodeSnafu {
                kind: "unstructured object",
            })?;
        let gvk = group_version_kind(&object)?;

        let (resource, capabilities) =
            pinned_kind(&self.client, &gvk)
                .await
                .context(error::DiscoverySnafu {
                    group: &gvk.group,
                    version: &gvk.version,
                    kind: &gvk.kind,
                })?;

        let api: Api<DynamicObject> = if capabilities.scope == Scope::Namespaced {
            let namespace = match object.metadata.namespace.as_deref() {
                Some(namespace) if !namespace.is_empty() => namespace.to_string(),
                _ => {
                    debug!(
                        "Placing {} '{}' in namespace '{}'",
                        gvk.kind,
                        object.name_any(),
                        self.namespace
                    );
                    object.metadata.namespace = Some(self.namespace.clone());
                    self.namespace.clone()
                }
            };
            Api::namespaced_with(self.client.clone(), &namespace, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        };

        let name = object.name_any();
        let result = match action {
            DynamicAction::Create => api.create(&PostParams::default(), &object).await,
            DynamicAction::Delete => api
                .delete(&name, &DeleteParams::default())
                .await
                .map(|_| object),
        };
        let object = result.map_err(|source| {
            error::DynamicSnafu {
                action: action.verb(),
                group: &gvk.group,
                kind: &gvk.kind,
            }
            .into_error(source)
        })?;
        info!("Finished {} {} '{}'", action.verb(), gvk.kind, name);
        Ok(object)
    }
}

/// Split the object's `apiVersion` into group and version and pair it with its `kind`. Core
/// objects (`v1`) have an empty group.
fn group_version_kind(object: &DynamicObject) -> Result<GroupVersionKind> {
    let types = object.types.as_ref().context(error::GvkSnafu)?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{MockApiServer, Reply};

    const INTERCONNECT: &str = r#"
# mesh resource without a typed handler
apiVersion: interconnectedcloud.github.io/v1alpha1
kind: Interconnect
metadata:
  name: amq-interconnect
spec:
  deploymentPlan:
    size: 1
"#;

    const CRD: &str = r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: widgets.example.io
spec:
  group: example.io
  names:
    kind: Widget
    plural: widgets
  scope: Namespaced
"#;

    fn interconnect_server() -> MockApiServer {
        let server = MockApiServer::new();
        server.on_discovery(
            "interconnectedcloud.github.io/v1alpha1",
            "Interconnect",
            "interconnects",
            true,
        );
        server
    }

    #[tokio::test]
    async fn namespace_is_injected_into_namespaced_objects() {
        let server = interconnect_server();
        server.on(
            "POST",
            "/apis/interconnectedcloud.github.io/v1alpha1/namespaces/ns-a/interconnects",
            Reply::created(),
        );
        let applier = DynamicApplier::new(server.client("default"), "ns-a");

        let created = applier
            .apply(DynamicAction::Create, INTERCONNECT.as_bytes())
            .await
            .unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].namespace().as_deref(), Some("ns-a"));
        let posts = server.requests_to("POST", "/apis/interconnectedcloud.github.io");
        assert_eq!(posts.len(), 1);
        assert_eq!(
            posts[0].body.as_ref().unwrap()["metadata"]["namespace"],
            "ns-a"
        );
    }

    #[tokio::test]
    async fn explicit_namespace_is_kept() {
        let server = interconnect_server();
        server.on(
            "POST",
            "/apis/interconnectedcloud.github.io/v1alpha1/namespaces/other/interconnects",
            Reply::created(),
        );
        let applier = DynamicApplier::new(server.client("default"), "ns-a");
        let manifest = INTERCONNECT.replace(
            "  name: amq-interconnect\n",
            "  name: amq-interconnect\n  namespace: other\n",
        );

        let created = applier
            .apply(DynamicAction::Create, manifest.as_bytes())
            .await
            .unwrap();
        assert_eq!(created[0].namespace().as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn cluster_scoped_objects_get_no_namespace() {
        let server = MockApiServer::new();
        server.on_discovery(
            "apiextensions.k8s.io/v1",
            "CustomResourceDefinition",
            "customresourcedefinitions",
            false,
        );
        server.on(
            "POST",
            "/apis/apiextensions.k8s.io/v1/customresourcedefinitions",
            Reply::created(),
        );
        let applier = DynamicApplier::new(server.client("default"), "ns-a");

        let created = applier
            .apply(DynamicAction::Create, CRD.as_bytes())
            .await
            .unwrap();
        assert_eq!(created[0].namespace(), None);
    }

    #[tokio::test]
    async fn delete_targets_the_named_object() {
        let server = interconnect_server();
        server.on(
            "DELETE",
            "/apis/interconnectedcloud.github.io/v1alpha1/namespaces/ns-a/interconnects/amq-interconnect",
            Reply::deleted(),
        );
        let applier = DynamicApplier::new(server.client("default"), "ns-a");
        applier
            .apply(DynamicAction::Delete, INTERCONNECT.as_bytes())
            .await
            .unwrap();
        assert_eq!(server.requests_to("DELETE", "/apis/").len(), 1);
    }

    #[tokio::test]
    async fn unknown_kind_fails_discovery() {
        let server = MockApiServer::new();
        let applier = DynamicApplier::new(server.client("default"), "ns-a");
        let err = applier
            .apply(DynamicAction::Create, INTERCONNECT.as_bytes())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Interconnect"));
    }

    #[tokio::test]
    async fn rejected_create_names_action_group_and_kind() {
        let server = interconnect_server();
        server.on(
            "POST",
            "/apis/interconnectedcloud.github.io/v1alpha1/namespaces/ns-a/interconnects",
            Reply::status(403, "Forbidden", "interconnects is forbidden"),
        );
        let applier = DynamicApplier::new(server.client("default"), "ns-a");
        let err = applier
            .apply(DynamicAction::Create, INTERCONNECT.as_bytes())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("creating"));
        assert!(message.contains("interconnectedcloud.github.io"));
        assert!(message.contains("Interconnect"));
    }

    #[tokio::test]
    async fn already_exists_is_classified() {
        let server = interconnect_server();
        server.on(
            "POST",
            "/apis/interconnectedcloud.github.io/v1alpha1/namespaces/ns-a/interconnects",
            Reply::already_exists("interconnects", "amq-interconnect"),
        );
        let applier = DynamicApplier::new(server.client("default"), "ns-a");
        let err = applier
            .apply(DynamicAction::Create, INTERCONNECT.as_bytes())
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }
}
