use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use kube::Resource as _;
use tokio::sync::RwLock;

use crate::{
    api::v1alpha1::{Kustomization, KustomizationExt as _, KustomizationStatus},
    error::Error,
    kube::KubeClientRequest,
    kustomize::{KustomizeBuild, KustomizeOptions, KustomizeService},
    logger,
};

use super::{tracking_key, ResourceTracker, RetryTracking};

pub struct Reconciler<C, B> {
    client: Arc<C>,
    kustomize: Arc<B>,
    options: Arc<KustomizeOptions>,
    tracker: ResourceTracker,
    tracking: RetryTracking,
    /// 最後に成功した世代
    reconciled: Arc<RwLock<HashMap<String, i64>>>,
}

impl<C, B> Clone for Reconciler<C, B> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            kustomize: self.kustomize.clone(),
            options: self.options.clone(),
            tracker: self.tracker.clone(),
            tracking: self.tracking.clone(),
            reconciled: self.reconciled.clone(),
        }
    }
}

impl<C, B> Reconciler<C, B>
where
    C: KubeClientRequest,
    B: KustomizeBuild,
{
    pub fn new(client: C, kustomize: B, options: KustomizeOptions) -> Self {
        Self {
            client: Arc::new(client),
            kustomize: Arc::new(kustomize),
            options: Arc::new(options),
            tracker: ResourceTracker::default(),
            tracking: RetryTracking::default(),
            reconciled: Arc::default(),
        }
    }

    /// イベントを受け取った順に呼ぶこと
    ///
    /// 最新のリソースを保存して、それまで保存していたものを返す
    pub async fn track(&self, resource: &Kustomization) -> Option<Kustomization> {
        self.tracker.rotate(resource).await
    }

    pub async fn added(&self, resource: &Kustomization) -> Result<()> {
        if self.is_stale(resource).await {
            return Ok(());
        }

        // 再 list で成功済みの世代が流れてきたときは何もしない
        let reconciled = self.reconciled_generation(resource).await;

        if reconciled.is_some() && reconciled == resource.metadata.generation {
            logger!(debug, "skip {}: already reconciled", resource.full_name());
            return Ok(());
        }

        self.reconcile(resource, "creating kustomization", "created kustomization")
            .await
    }

    /// `old` は `track` が返した変更前のリソース
    pub async fn modified(
        &self,
        resource: &Kustomization,
        old: Option<&Kustomization>,
    ) -> Result<()> {
        if self.is_stale(resource).await {
            return Ok(());
        }

        // status の更新だけでは generation は変わらない
        if old.is_some_and(|old| old.metadata.generation == resource.metadata.generation) {
            logger!(debug, "skip {}: generation not changed", resource.full_name());
            return Ok(());
        }

        self.reconcile(resource, "modifying kustomization", "modified kustomization")
            .await
    }

    /// 生成したリソースの削除は owner reference による GC に任せる
    pub async fn deleted(&self, resource: &Kustomization) -> Result<()> {
        self.tracker.forget(&resource.metadata).await;
        self.tracking.forget(resource).await;
        self.reconciled
            .write()
            .await
            .remove(&tracking_key(resource.meta()));

        logger!(info, "deleted {}", resource.full_name());

        Ok(())
    }

    /// 後から届いた新しい世代がすでに追跡されている
    async fn is_stale(&self, resource: &Kustomization) -> bool {
        let latest = self
            .tracker
            .get::<Kustomization>(&resource.metadata)
            .await
            .map(|latest| latest.metadata.generation);

        let stale = latest.is_some_and(|latest| latest != resource.metadata.generation);

        if stale {
            logger!(
                debug,
                "skip {}: generation {:?} is outdated",
                resource.full_name(),
                resource.metadata.generation
            );
        }

        stale
    }

    async fn reconciled_generation(&self, resource: &Kustomization) -> Option<i64> {
        self.reconciled
            .read()
            .await
            .get(&tracking_key(resource.meta()))
            .copied()
    }

    async fn reconcile(&self, resource: &Kustomization, pending: &str, done: &str) -> Result<()> {
        logger!(info, "{} {}", pending, resource.full_name());

        self.update_status(resource, KustomizationStatus::pending(pending))
            .await?;

        self.tracking.register(resource).await;

        let owner = self.options.set_owner_references.then_some(resource);

        let result = KustomizeService::new(
            self.client.as_ref(),
            self.kustomize.as_ref(),
            resource,
            &self.options,
        )
        .tracking(&self.tracking)
        .apply(owner)
        .await;

        self.tracking.unregister(resource).await;

        match result {
            Ok(()) => {
                logger!(info, "{} {}", done, resource.full_name());

                if let Some(generation) = resource.metadata.generation {
                    self.reconciled
                        .write()
                        .await
                        .insert(tracking_key(resource.meta()), generation);
                }

                self.update_status(resource, KustomizationStatus::succeeded(done))
                    .await
            }
            Err(err) if matches!(err.downcast_ref::<Error>(), Some(Error::Superseded(_))) => {
                Err(err)
            }
            Err(err) => {
                logger!(error, "{} failed: {:#}", resource.full_name(), err);

                self.update_status(resource, KustomizationStatus::failed(format!("{:#}", err)))
                    .await?;

                Err(err)
            }
        }
    }

    async fn update_status(
        &self,
        resource: &Kustomization,
        status: KustomizationStatus,
    ) -> Result<()> {
        let (Some(name), Some(namespace)) = (&resource.metadata.name, &resource.metadata.namespace)
        else {
            logger!(warn, "skip status update: {}", Error::MissingMetadata);
            return Ok(());
        };

        self.client
            .patch_kustomization_status(namespace, name, &status)
            .await
    }
}
