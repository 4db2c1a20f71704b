use std::{collections::HashMap, sync::Arc};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use tokio::sync::RwLock;

use crate::api::v1alpha1::RuntimeObject;

/// `name.namespace`
pub fn tracking_key(meta: &ObjectMeta) -> String {
    format!(
        "{}.{}",
        meta.name.as_deref().unwrap_or_default(),
        meta.namespace.as_deref().unwrap_or_default()
    )
}

/// 最後に受け取ったリソースのコピーを保持する
///
/// watch の Modified には変更前のオブジェクトが含まれないので、ここから取り出して比較する
#[derive(Default, Clone)]
pub struct ResourceTracker {
    resources: Arc<RwLock<HashMap<String, Box<dyn RuntimeObject>>>>,
}

impl ResourceTracker {
    /// `resource` のコピーを保存し、それまで保存していたものを返す
    pub async fn rotate<K>(&self, resource: &K) -> Option<K>
    where
        K: RuntimeObject + Resource + Clone,
    {
        let key = tracking_key(resource.meta());

        let old = self
            .resources
            .write()
            .await
            .insert(key, resource.deep_copy_object());

        old.and_then(|old| old.downcast_ref::<K>().cloned())
    }

    pub async fn get<K>(&self, meta: &ObjectMeta) -> Option<K>
    where
        K: RuntimeObject + Clone,
    {
        self.resources
            .read()
            .await
            .get(&tracking_key(meta))
            .and_then(|resource| resource.downcast_ref::<K>().cloned())
    }

    pub async fn forget(&self, meta: &ObjectMeta) -> bool {
        self.resources
            .write()
            .await
            .remove(&tracking_key(meta))
            .is_some()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.resources.read().await.len()
    }
}
