use super::error::K8sError;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Api, Client, Config, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use tracing::{debug, trace};

/// Field manager owning every field the controller applies.
pub const FIELD_MANAGER: &str = "kube-actions";

/// Any namespaced object the controller reads or writes, built-in kinds and custom
/// resources alike.
pub trait NamespacedResource:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> NamespacedResource for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Thin layer over [kube::Client]: not-found is a value, writes are server-side applies.
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// In-cluster configuration first, then the local kubeconfig.
    pub async fn try_default() -> Result<Self, K8sError> {
        let config = match Config::incluster() {
            Ok(config) => config,
            Err(err) => {
                debug!("not running in a cluster ({err}), reading the kubeconfig");
                Config::from_kubeconfig(&KubeConfigOptions::default()).await?
            }
        };
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn namespaced<K: NamespacedResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub async fn get<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, K8sError> {
        Ok(self.namespaced::<K>(namespace).get_opt(name).await?)
    }

    pub async fn list<K: NamespacedResource>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>, K8sError> {
        let params = ListParams::default().labels(label_selector);
        let list = self.namespaced::<K>(namespace).list(&params).await?;
        Ok(list.items)
    }

    /// Creates or updates `obj`, forcing ownership of the fields it carries.
    pub async fn apply<K: NamespacedResource>(&self, obj: &K) -> Result<K, K8sError> {
        let namespace = obj
            .namespace()
            .ok_or(K8sError::MissingMetadata("namespace"))?;
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or(K8sError::MissingMetadata("name"))?;

        trace!(kind = %K::kind(&()), %namespace, %name, "applying object");
        let params = PatchParams::apply(FIELD_MANAGER).force();
        Ok(self
            .namespaced::<K>(&namespace)
            .patch(&name, &params, &Patch::Apply(obj))
            .await?)
    }

    /// Creates an object named by the api server from `metadata.generateName`.
    pub async fn create<K: NamespacedResource>(&self, obj: &K) -> Result<K, K8sError> {
        let namespace = obj
            .namespace()
            .ok_or(K8sError::MissingMetadata("namespace"))?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(self.namespaced::<K>(&namespace).create(&params, obj).await?)
    }

    pub async fn apply_status<K, S>(
        &self,
        namespace: &str,
        name: &str,
        status: &S,
    ) -> Result<K, K8sError>
    where
        K: NamespacedResource,
        S: Serialize,
    {
        let patch = json!({
            "apiVersion": K::api_version(&()),
            "kind": K::kind(&()),
            "status": serde_json::to_value(status)?,
        });
        let params = PatchParams::apply(FIELD_MANAGER).force();
        Ok(self
            .namespaced::<K>(namespace)
            .patch_status(name, &params, &Patch::Apply(&patch))
            .await?)
    }

    /// Deletes the object, returning false when it was already gone.
    pub async fn delete_if_exists<K: NamespacedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<bool, K8sError> {
        match self
            .namespaced::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(kind = %K::kind(&()), %namespace, %name, "object already deleted");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}
