use std::time::Duration;

use anyhow::Result;
use futures::{StreamExt, TryStreamExt};
use kube::{
    api::{ListParams, WatchEvent, WatchParams},
    Api,
};
use tokio::task::JoinHandle;

use crate::{
    api::v1alpha1::{Kustomization, KustomizationExt as _, KustomizationList},
    kube::KubeClientRequest,
    kustomize::KustomizeBuild,
    logger,
};

use super::Reconciler;

/// 410 Gone: resourceVersion が古すぎる
const GONE: u16 = 410;

#[derive(Debug, Clone, PartialEq)]
pub enum WatchAction {
    Added(Box<Kustomization>),
    Modified(Box<Kustomization>),
    Deleted(Box<Kustomization>),
    Bookmark(String),
    Relist,
    Ignore,
}

impl WatchAction {
    fn resource_version(&self) -> Option<&str> {
        match self {
            Self::Added(k) | Self::Modified(k) | Self::Deleted(k) => {
                k.metadata.resource_version.as_deref()
            }
            Self::Bookmark(rv) => Some(rv),
            Self::Relist | Self::Ignore => None,
        }
    }
}

pub fn plan(event: WatchEvent<Kustomization>) -> WatchAction {
    match event {
        WatchEvent::Added(k) => WatchAction::Added(Box::new(k)),
        WatchEvent::Modified(k) => WatchAction::Modified(Box::new(k)),
        WatchEvent::Deleted(k) => WatchAction::Deleted(Box::new(k)),
        WatchEvent::Bookmark(bookmark) => WatchAction::Bookmark(bookmark.metadata.resource_version),
        WatchEvent::Error(err) if err.code == GONE => {
            logger!(info, "watch expired: {}", err.message);
            WatchAction::Relist
        }
        WatchEvent::Error(err) => {
            logger!(error, "watch error: {:?}", err);
            WatchAction::Ignore
        }
    }
}

/// イベントを受信順に追跡してから、reconcile を別タスクで走らせる
pub struct EventDispatcher<C, B> {
    reconciler: Reconciler<C, B>,
}

impl<C, B> EventDispatcher<C, B>
where
    C: KubeClientRequest + 'static,
    B: KustomizeBuild + 'static,
{
    pub fn new(reconciler: Reconciler<C, B>) -> Self {
        Self { reconciler }
    }

    /// 追跡は呼び出し側のタスクで終わらせるので、続くイベントの `old` は常にこのイベントになる
    pub async fn dispatch(&self, action: WatchAction) -> Option<JoinHandle<()>> {
        let task = match action {
            WatchAction::Added(k) => {
                self.reconciler.track(&k).await;
                Task::Added(k)
            }
            WatchAction::Modified(k) => {
                let old = self.reconciler.track(&k).await;
                Task::Modified(k, old)
            }
            WatchAction::Deleted(k) => {
                if let Err(err) = self.reconciler.deleted(&k).await {
                    logger!(
                        error,
                        "event=deleted kustomization={} error={:#}",
                        k.full_name(),
                        err
                    );
                }
                return None;
            }
            WatchAction::Bookmark(_) | WatchAction::Relist | WatchAction::Ignore => return None,
        };

        let reconciler = self.reconciler.clone();

        let handle = tokio::spawn(async move {
            let (event, resource, result) = match &task {
                Task::Added(k) => ("added", k, reconciler.added(k).await),
                Task::Modified(k, old) => {
                    ("modified", k, reconciler.modified(k, old.as_ref()).await)
                }
            };

            if let Err(err) = result {
                logger!(
                    error,
                    "event={} kustomization={} error={:#}",
                    event,
                    resource.full_name(),
                    err
                );
            }
        });

        Some(handle)
    }
}

enum Task {
    Added(Box<Kustomization>),
    Modified(Box<Kustomization>, Option<Kustomization>),
}

pub struct KustomizationWatcher<C, B> {
    api: Api<Kustomization>,
    dispatcher: EventDispatcher<C, B>,
    timeout_secs: u32,
    retry_interval: Duration,
}

impl<C, B> KustomizationWatcher<C, B>
where
    C: KubeClientRequest + 'static,
    B: KustomizeBuild + 'static,
{
    pub fn new(api: Api<Kustomization>, reconciler: Reconciler<C, B>) -> Self {
        Self {
            api,
            dispatcher: EventDispatcher::new(reconciler),
            timeout_secs: 180,
            retry_interval: Duration::from_secs(1),
        }
    }

    pub fn timeout_secs(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// list で既存のリソースを処理してから、その resourceVersion 以降を watch する
    ///
    /// API サーバーに届かなくても終了せず、`retry_interval` ごとに list し直す
    pub async fn run(&self) -> Result<()> {
        loop {
            let list = match self.api.list(&ListParams::default()).await {
                Ok(list) => KustomizationList::from(list),
                Err(err) => {
                    logger!(error, "failed to list kustomizations: {}", err);
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }
            };

            logger!(info, "listed {} kustomizations", list.items.len());

            let mut resource_version = list.resource_version().unwrap_or("0").to_string();

            for item in list.items {
                self.dispatcher
                    .dispatch(WatchAction::Added(Box::new(item)))
                    .await;
            }

            self.watch(&mut resource_version).await;

            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// 再 list が必要になったら戻る
    async fn watch(&self, resource_version: &mut String) {
        let wp = WatchParams::default().timeout(self.timeout_secs);

        loop {
            let version = resource_version.clone();

            let stream = match self.api.watch(&wp, &version).await {
                Ok(stream) => stream,
                Err(err) => {
                    logger!(error, "failed to watch kustomizations: {}", err);
                    return;
                }
            };

            let mut stream = stream.boxed();

            loop {
                match stream.try_next().await {
                    Ok(Some(event)) => match plan(event) {
                        WatchAction::Relist => return,
                        WatchAction::Ignore => {}
                        action => {
                            if let Some(rv) = action.resource_version() {
                                *resource_version = rv.to_string();
                            }

                            self.dispatcher.dispatch(action).await;
                        }
                    },
                    // タイムアウトしたので同じ resourceVersion から watch し直す
                    Ok(None) => break,
                    Err(err) => {
                        logger!(error, "watch stream error: {}", err);
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn event(value: Value) -> WatchEvent<Kustomization> {
        serde_json::from_value(value).unwrap()
    }

    fn kustomization_json(resource_version: &str) -> Value {
        json!({
            "apiVersion": "kustomize.siliconhills.dev/v1alpha1",
            "kind": "Kustomization",
            "metadata": {
                "name": "hello",
                "namespace": "default",
                "resourceVersion": resource_version,
                "generation": 1
            },
            "spec": {}
        })
    }

    #[test]
    fn added_is_reconciled() {
        let action = plan(event(json!({
            "type": "ADDED",
            "object": kustomization_json("10")
        })));

        let WatchAction::Added(k) = &action else {
            panic!("unexpected action: {:?}", action);
        };

        assert_eq!(k.metadata.name.as_deref(), Some("hello"));
        assert_eq!(action.resource_version(), Some("10"));
    }

    #[test]
    fn modified_and_deleted_carry_resource_version() {
        let modified = plan(event(json!({
            "type": "MODIFIED",
            "object": kustomization_json("11")
        })));
        let deleted = plan(event(json!({
            "type": "DELETED",
            "object": kustomization_json("12")
        })));

        assert!(matches!(modified, WatchAction::Modified(_)));
        assert_eq!(modified.resource_version(), Some("11"));
        assert!(matches!(deleted, WatchAction::Deleted(_)));
        assert_eq!(deleted.resource_version(), Some("12"));
    }

    #[test]
    fn bookmark_updates_resource_version() {
        let action = plan(event(json!({
            "type": "BOOKMARK",
            "object": {
                "apiVersion": "kustomize.siliconhills.dev/v1alpha1",
                "kind": "Kustomization",
                "metadata": { "resourceVersion": "42" }
            }
        })));

        assert_eq!(action, WatchAction::Bookmark("42".into()));
    }

    #[test]
    fn gone_requires_relist() {
        let action = plan(event(json!({
            "type": "ERROR",
            "object": {
                "status": "Failure",
                "message": "too old resource version",
                "reason": "Expired",
                "code": 410
            }
        })));

        assert_eq!(action, WatchAction::Relist);
    }

    #[test]
    fn other_errors_are_ignored() {
        let action = plan(event(json!({
            "type": "ERROR",
            "object": {
                "status": "Failure",
                "message": "internal error",
                "reason": "InternalError",
                "code": 500
            }
        })));

        assert_eq!(action, WatchAction::Ignore);
    }

    mod dispatch {
        use super::*;
        use std::sync::{Arc, Mutex};

        use kube::Client;
        use pretty_assertions::assert_eq;

        use crate::{
            api::v1alpha1::KustomizationSpec,
            kube::mock::MockTestKubeClient,
            kustomize::{mock::MockTestKustomize, KustomizeOptions},
        };

        fn kustomization(generation: i64) -> Box<Kustomization> {
            let mut k = Kustomization::new("hello", KustomizationSpec::default());
            k.metadata.namespace = Some("default".into());
            k.metadata.generation = Some(generation);
            Box::new(k)
        }

        fn options() -> KustomizeOptions {
            KustomizeOptions {
                retry_timeout: Duration::ZERO,
                ..Default::default()
            }
        }

        #[tokio::test]
        async fn 後のイベントを先に処理しても最新の世代が残る() {
            let messages = Arc::new(Mutex::new(Vec::new()));

            let mut client = MockTestKubeClient::new();
            let recorded = messages.clone();
            client
                .expect_patch_kustomization_status()
                .returning(move |_, _, status| {
                    recorded
                        .lock()
                        .unwrap()
                        .push(status.message.clone().unwrap_or_default());
                    Ok(())
                });

            let dispatcher = EventDispatcher::new(Reconciler::new(
                client,
                MockTestKustomize::new(),
                options(),
            ));

            let added = dispatcher
                .dispatch(WatchAction::Added(kustomization(1)))
                .await
                .unwrap();
            let modified = dispatcher
                .dispatch(WatchAction::Modified(kustomization(2)))
                .await
                .unwrap();

            modified.await.unwrap();
            added.await.unwrap();

            let messages = messages.lock().unwrap().clone();

            assert_eq!(
                messages.last().map(String::as_str),
                Some("modified kustomization")
            );
            assert!(!messages.iter().any(|m| m == "created kustomization"));
        }

        #[tokio::test]
        async fn deletedとbookmarkはタスクを作らない() {
            let dispatcher = EventDispatcher::new(Reconciler::new(
                MockTestKubeClient::new(),
                MockTestKustomize::new(),
                options(),
            ));

            assert!(dispatcher
                .dispatch(WatchAction::Deleted(kustomization(1)))
                .await
                .is_none());
            assert!(dispatcher
                .dispatch(WatchAction::Bookmark("42".into()))
                .await
                .is_none());
        }

        #[tokio::test]
        async fn listに失敗しても終了せずにリトライする() {
            let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
            let client = Client::try_from(config).unwrap();

            let mut kube_client = MockTestKubeClient::new();
            kube_client.expect_patch_kustomization_status().never();

            let watcher = KustomizationWatcher::new(
                Api::<Kustomization>::namespaced(client, "default"),
                Reconciler::new(kube_client, MockTestKustomize::new(), options()),
            )
            .retry_interval(Duration::from_millis(10));

            let result = tokio::time::timeout(Duration::from_millis(300), watcher.run()).await;

            assert!(result.is_err(), "run returned early: {:?}", result);
        }
    }
}
