use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kube::{
    api::{ApiResource, DynamicObject, Patch, PatchParams},
    core::GroupVersionKind,
    discovery::{self, Scope},
    Api, Client,
};
use serde_json::json;

use crate::{
    api::v1alpha1::{kind_to_plural, Kustomization, KustomizationStatus, Selector},
    logger,
};

fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// `TypeMeta` から GVK を組み立てる
fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| anyhow!("apiVersion and kind must be set"))?;

    let (group, version) = split_api_version(&types.api_version);

    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

fn gvk_of_selector(selector: &Selector) -> Result<GroupVersionKind> {
    let version = selector
        .gvk
        .version
        .as_deref()
        .ok_or_else(|| anyhow!("selector version must be set"))?;

    let kind = selector
        .gvk
        .kind
        .as_deref()
        .ok_or_else(|| anyhow!("selector kind must be set"))?;

    Ok(GroupVersionKind::gvk(
        selector.gvk.group.as_deref().unwrap_or_default(),
        version,
        kind,
    ))
}

#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// GVK から API リソースを引く
    ///
    /// discovery に失敗したときは kind から複数形を推測し、namespaced として扱う
    async fn resolve(&self, gvk: &GroupVersionKind) -> (ApiResource, bool) {
        match discovery::pinned_kind(&self.client, gvk).await {
            Ok((resource, capabilities)) => {
                let namespaced = capabilities.scope == Scope::Namespaced;
                (resource, namespaced)
            }
            Err(err) => {
                logger!(
                    warn,
                    "discovery failed for {:?}, falling back to plural guess: {}",
                    gvk,
                    err
                );

                let resource = ApiResource::from_gvk_with_plural(gvk, &kind_to_plural(&gvk.kind));

                (resource, true)
            }
        }
    }

    async fn dynamic_api(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
    ) -> Api<DynamicObject> {
        let (resource, namespaced) = self.resolve(gvk).await;

        if namespaced {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        }
    }
}

#[async_trait]
pub trait KubeClientRequest: Send + Sync {
    /// セレクタで指定されたリソースを取得する。存在しなければ `None`
    async fn fetch_selected(
        &self,
        selector: &Selector,
        default_namespace: &str,
    ) -> Result<Option<DynamicObject>>;

    /// server-side apply
    async fn apply(&self, object: &DynamicObject, field_manager: &str) -> Result<DynamicObject>;

    async fn patch_kustomization_status(
        &self,
        namespace: &str,
        name: &str,
        status: &KustomizationStatus,
    ) -> Result<()>;
}

#[async_trait]
impl KubeClientRequest for KubeClient {
    async fn fetch_selected(
        &self,
        selector: &Selector,
        default_namespace: &str,
    ) -> Result<Option<DynamicObject>> {
        let gvk = gvk_of_selector(selector)?;

        let name = selector
            .name
            .as_deref()
            .ok_or_else(|| anyhow!("selector name must be set"))?;

        let namespace = selector.namespace.as_deref().unwrap_or(default_namespace);

        let api = self.dynamic_api(&gvk, namespace).await;

        logger!(debug, "get {:?} {}/{}", gvk, namespace, name);

        let object = api.get_opt(name).await?;

        Ok(object)
    }

    async fn apply(&self, object: &DynamicObject, field_manager: &str) -> Result<DynamicObject> {
        let gvk = gvk_of(object)?;

        let (Some(name), Some(namespace)) = (&object.metadata.name, &object.metadata.namespace)
        else {
            return Err(anyhow!("metadata.name and metadata.namespace must be set"));
        };

        let api = self.dynamic_api(&gvk, namespace).await;

        let params = PatchParams::apply(field_manager).force();

        logger!(info, "apply {:?} {}/{}", gvk, namespace, name);

        let applied = api.patch(name, &params, &Patch::Apply(object)).await?;

        Ok(applied)
    }

    async fn patch_kustomization_status(
        &self,
        namespace: &str,
        name: &str,
        status: &KustomizationStatus,
    ) -> Result<()> {
        let api: Api<Kustomization> = Api::namespaced(self.client.clone(), namespace);

        let patch = json!({ "status": status });

        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }
}
