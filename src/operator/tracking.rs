use std::{collections::HashMap, sync::Arc};

use kube::Resource as _;
use tokio::sync::RwLock;

use crate::api::v1alpha1::Kustomization;

use super::tracking_key;

/// リトライ中の Kustomization の世代
///
/// 新しい世代が登録されると、古い世代のリトライは打ち切られる
#[derive(Default, Clone)]
pub struct RetryTracking {
    generations: Arc<RwLock<HashMap<String, i64>>>,
}

fn generation(resource: &Kustomization) -> i64 {
    resource.meta().generation.unwrap_or_default()
}

impl RetryTracking {
    pub async fn register(&self, resource: &Kustomization) {
        self.generations
            .write()
            .await
            .insert(tracking_key(resource.meta()), generation(resource));
    }

    /// 登録されている世代が `resource` と同じときだけ削除する
    pub async fn unregister(&self, resource: &Kustomization) {
        let key = tracking_key(resource.meta());

        let mut generations = self.generations.write().await;

        if generations.get(&key) == Some(&generation(resource)) {
            generations.remove(&key);
        }
    }

    pub async fn forget(&self, resource: &Kustomization) {
        self.generations
            .write()
            .await
            .remove(&tracking_key(resource.meta()));
    }

    pub async fn is_current(&self, resource: &Kustomization) -> bool {
        self.generations
            .read()
            .await
            .get(&tracking_key(resource.meta()))
            == Some(&generation(resource))
    }
}
