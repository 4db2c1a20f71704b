use std::time::Duration;

use anyhow::Result;
use futures::future::try_join_all;
use kube::{api::DynamicObject, Resource as _, ResourceExt as _};

use crate::{
    api::v1alpha1::{Kustomization, KustomizationExt as _, KIND},
    config::Config,
    error::Error,
    kube::KubeClientRequest,
    logger,
    operator::RetryTracking,
};

use super::{
    command::KustomizeBuild,
    session::Session,
    util::{sanitize_resource, string_to_resources},
};

#[derive(Debug, Clone)]
pub struct KustomizeOptions {
    /// `spec.retryTimeout` がないときのリトライ時間
    pub retry_timeout: Duration,
    pub min_retry_wait: Duration,
    pub field_manager: String,
    pub set_owner_references: bool,
}

impl Default for KustomizeOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for KustomizeOptions {
    fn from(config: &Config) -> Self {
        Self {
            retry_timeout: Duration::from_millis(config.retry.timeout_ms),
            min_retry_wait: Duration::from_millis(config.retry.min_wait_ms),
            field_manager: config.field_manager.clone(),
            set_owner_references: config.set_owner_references,
        }
    }
}

/// リトライ間隔: リトライ時間の 1/10、ただし `min_wait` 以上
pub fn retry_wait(retry_timeout: Duration, min_wait: Duration) -> Duration {
    std::cmp::max(min_wait, retry_timeout / 10)
}

/// `owner` と同じネームスペースのリソースに owner reference を追加する
///
/// すでに同じ uid の参照があるときは何もしない
pub fn add_owner_reference(
    mut resource: DynamicObject,
    owner: Option<&Kustomization>,
) -> Result<DynamicObject, Error> {
    let (Some(_), Some(namespace)) = (&resource.metadata.name, &resource.metadata.namespace) else {
        return Err(Error::MissingMetadata);
    };

    let mut owner_references = resource.metadata.owner_references.take().unwrap_or_default();

    if let Some(owner) = owner {
        let owner_uid = owner.uid().unwrap_or_default();

        if owner.namespace().as_ref() == Some(namespace)
            && !owner_references.iter().any(|r| r.uid == owner_uid)
        {
            if let Some(owner_reference) = owner.owner_ref(&()) {
                owner_references.push(owner_reference);
            }
        }
    }

    if !owner_references.is_empty() {
        resource.metadata.owner_references = Some(owner_references);
    }

    Ok(resource)
}

fn is_kustomization(resource: &DynamicObject) -> bool {
    resource
        .types
        .as_ref()
        .is_some_and(|types| types.kind == KIND)
}

pub struct KustomizeService<'a, C: KubeClientRequest, B: KustomizeBuild> {
    client: &'a C,
    kustomize: &'a B,
    resource: &'a Kustomization,
    options: &'a KustomizeOptions,
    tracking: Option<&'a RetryTracking>,
}

impl<'a, C: KubeClientRequest, B: KustomizeBuild> KustomizeService<'a, C, B> {
    pub fn new(
        client: &'a C,
        kustomize: &'a B,
        resource: &'a Kustomization,
        options: &'a KustomizeOptions,
    ) -> Self {
        Self {
            client,
            kustomize,
            resource,
            options,
            tracking: None,
        }
    }

    pub fn tracking(mut self, tracking: &'a RetryTracking) -> Self {
        self.tracking = Some(tracking);
        self
    }

    fn retry_timeout(&self) -> Duration {
        self.resource
            .spec
            .retry_timeout
            // 0 は未設定と同じ扱い
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.options.retry_timeout)
    }

    fn expected_resources(&self) -> usize {
        self.resource.spec.resources.as_ref().map_or(0, Vec::len)
    }

    // TODO: labelSelector と annotationSelector で複数のリソースを選べるようにする
    pub async fn get_resources(&self) -> Result<Vec<DynamicObject>> {
        let Some(namespace) = self.resource.namespace() else {
            return Ok(Vec::new());
        };

        let Some(selectors) = self.resource.spec.resources.as_ref().filter(|s| !s.is_empty())
        else {
            return Ok(Vec::new());
        };

        let fetched = try_join_all(
            selectors
                .iter()
                .map(|selector| self.client.fetch_selected(selector, &namespace)),
        )
        .await?;

        Ok(fetched.into_iter().flatten().map(sanitize_resource).collect())
    }

    async fn try_patch(&self) -> Result<Vec<DynamicObject>> {
        let resources = self.get_resources().await?;

        if resources.len() < self.expected_resources() {
            return Err(Error::ResourcesNotFound(self.resource.full_name()).into());
        }

        if resources.is_empty() {
            return Ok(Vec::new());
        }

        let session = Session::new()?;

        session.set_resources(&resources).await?;
        session.set_kustomization(&self.resource.spec).await?;

        let patched = self.kustomize.build(session.workdir()).await?;

        session.cleanup().await?;

        let patched = string_to_resources(&patched)?
            .into_iter()
            .map(serde_json::from_value::<DynamicObject>)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(patched)
    }

    async fn is_superseded(&self) -> bool {
        match self.tracking {
            Some(tracking) => !tracking.is_current(self.resource).await,
            None => false,
        }
    }

    /// パッチを当てたリソースを返す
    ///
    /// 失敗したときはリトライ時間が尽きるまで繰り返す
    pub async fn patch(&self) -> Result<Vec<DynamicObject>> {
        let retry_timeout = self.retry_timeout();
        let wait = retry_wait(retry_timeout, self.options.min_retry_wait);

        let mut time_left = retry_timeout;

        loop {
            let err = match self.try_patch().await {
                Ok(patched) => {
                    logger!(info, "applied patches for {}", self.resource.full_name());
                    return Ok(patched);
                }
                Err(err) => err,
            };

            if time_left.is_zero() {
                return Err(err);
            }

            if self.is_superseded().await {
                logger!(info, "stopped retrying {}", self.resource.full_name());
                return Err(Error::Superseded(self.resource.full_name()).into());
            }

            logger!(
                warn,
                "received the following error, but will retry in {}ms and will keep retrying until {}ms expires\n{:#}",
                wait.as_millis(),
                time_left.as_millis(),
                err
            );

            tokio::time::sleep(wait).await;

            time_left = time_left.saturating_sub(wait);
        }
    }

    pub async fn apply(&self, owner: Option<&Kustomization>) -> Result<()> {
        let resources = self
            .patch()
            .await?
            .into_iter()
            .filter(|resource| !is_kustomization(resource))
            .map(|resource| add_owner_reference(resource, owner))
            .collect::<Result<Vec<_>, _>>()?;

        if resources.is_empty() {
            return Ok(());
        }

        for resource in &resources {
            self.client
                .apply(resource, &self.options.field_manager)
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use mockall::predicate::{always, eq};
    use serde_json::json;

    use crate::{
        api::v1alpha1::{Gvk, KustomizationSpec, Selector},
        kube::mock::MockTestKubeClient,
        kustomize::mock::MockTestKustomize,
    };

    fn options() -> KustomizeOptions {
        KustomizeOptions {
            retry_timeout: Duration::ZERO,
            min_retry_wait: Duration::from_millis(1),
            field_manager: "kustomize-operator".into(),
            set_owner_references: false,
        }
    }

    fn selector(name: &str) -> Selector {
        Selector {
            gvk: Gvk {
                group: Some("apps".into()),
                version: Some("v1".into()),
                kind: Some("Deployment".into()),
            },
            name: Some(name.into()),
            ..Default::default()
        }
    }

    fn kustomization(selectors: Vec<Selector>) -> Kustomization {
        let mut k = Kustomization::new(
            "patch-nginx",
            KustomizationSpec {
                name_prefix: Some("prod-".into()),
                resources: Some(selectors),
                ..Default::default()
            },
        );
        k.metadata.namespace = Some("default".into());
        k.metadata.uid = Some("owner-uid".into());
        k
    }

    fn object(kind: &str, name: &str, namespace: Option<&str>) -> DynamicObject {
        let mut metadata = json!({ "name": name });

        if let Some(ns) = namespace {
            metadata["namespace"] = json!(ns);
        }

        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": kind,
            "metadata": metadata,
        }))
        .unwrap()
    }

    mod retry_wait {
        use super::*;
        use pretty_assertions::assert_eq;
        use rstest::rstest;

        #[rstest]
        #[case(60_000, 5_000, 6_000)]
        #[case(10_000, 5_000, 5_000)]
        #[case(0, 5_000, 5_000)]
        fn retry_wait_of(#[case] timeout: u64, #[case] min: u64, #[case] expected: u64) {
            assert_eq!(
                retry_wait(Duration::from_millis(timeout), Duration::from_millis(min)),
                Duration::from_millis(expected)
            )
        }
    }

    mod owner_reference {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn adds_owner_reference_in_same_namespace() {
            let owner = kustomization(vec![]);

            let actual =
                add_owner_reference(object("Deployment", "nginx", Some("default")), Some(&owner))
                    .unwrap();

            let refs = actual.metadata.owner_references.unwrap();

            assert_eq!(refs.len(), 1);
            assert_eq!(refs[0].uid, "owner-uid");
            assert_eq!(refs[0].kind, "Kustomization");
            assert_eq!(refs[0].name, "patch-nginx");
        }

        #[test]
        fn does_not_duplicate_owner_reference() {
            let owner = kustomization(vec![]);

            let mut resource = object("Deployment", "nginx", Some("default"));
            resource.metadata.owner_references = Some(vec![OwnerReference {
                uid: "owner-uid".into(),
                ..Default::default()
            }]);

            let actual = add_owner_reference(resource, Some(&owner)).unwrap();

            assert_eq!(actual.metadata.owner_references.unwrap().len(), 1);
        }

        #[test]
        fn skips_other_namespace() {
            let owner = kustomization(vec![]);

            let actual =
                add_owner_reference(object("Deployment", "nginx", Some("other")), Some(&owner))
                    .unwrap();

            assert_eq!(actual.metadata.owner_references, None);
        }

        #[test]
        fn missing_namespace_is_error() {
            let result = add_owner_reference(object("Deployment", "nginx", None), None);

            assert!(matches!(result, Err(Error::MissingMetadata)));
        }
    }

    mod get_resources {
        use super::*;
        use pretty_assertions::assert_eq;

        #[tokio::test]
        async fn no_selectors_returns_empty() {
            let client = MockTestKubeClient::new();
            let kustomize = MockTestKustomize::new();
            let resource = kustomization(vec![]);
            let options = options();

            let service = KustomizeService::new(&client, &kustomize, &resource, &options);

            assert_eq!(service.get_resources().await.unwrap().len(), 0);
        }

        #[tokio::test]
        async fn selectors_use_kustomization_namespace() {
            let mut client = MockTestKubeClient::new();
            client
                .expect_fetch_selected()
                .with(eq(selector("nginx")), eq("default"))
                .returning(|_, _| Ok(Some(object("Deployment", "nginx", Some("default")))));

            let kustomize = MockTestKustomize::new();
            let resource = kustomization(vec![selector("nginx")]);
            let options = options();

            let service = KustomizeService::new(&client, &kustomize, &resource, &options);

            let actual = service.get_resources().await.unwrap();

            assert_eq!(actual.len(), 1);
            assert_eq!(actual[0].metadata.name.as_deref(), Some("nginx"));
        }
    }

    mod patch {
        use super::*;
        use std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        };
        use pretty_assertions::assert_eq;

        #[tokio::test]
        async fn missing_resource_is_error() {
            let mut client = MockTestKubeClient::new();
            client
                .expect_fetch_selected()
                .times(1)
                .returning(|_, _| Ok(None));

            let kustomize = MockTestKustomize::new();
            let resource = kustomization(vec![selector("nginx")]);
            let options = options();

            let service = KustomizeService::new(&client, &kustomize, &resource, &options);

            let err = service.patch().await.unwrap_err();

            assert_eq!(
                err.to_string(),
                "failed to find some resources for default/patch-nginx"
            );
        }

        #[tokio::test]
        async fn retries_until_timeout_expires() {
            let mut client = MockTestKubeClient::new();
            client
                .expect_fetch_selected()
                .times(11)
                .returning(|_, _| bail!("connection refused"));

            let kustomize = MockTestKustomize::new();
            let mut resource = kustomization(vec![selector("nginx")]);
            resource.spec.retry_timeout = Some(20);
            let options = KustomizeOptions {
                min_retry_wait: Duration::from_millis(1),
                ..options()
            };

            let service = KustomizeService::new(&client, &kustomize, &resource, &options);

            let err = service.patch().await.unwrap_err();

            assert_eq!(err.to_string(), "connection refused");
        }

        #[tokio::test]
        async fn zero_retry_timeout_falls_back_to_default() {
            let attempts = Arc::new(AtomicUsize::new(0));

            let mut client = MockTestKubeClient::new();
            let counter = attempts.clone();
            client.expect_fetch_selected().returning(move |_, _| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    bail!("transient");
                }
                Ok(Some(object("Deployment", "nginx", Some("default"))))
            });

            let mut kustomize = MockTestKustomize::new();
            kustomize
                .expect_build()
                .returning(|_| Ok(String::new()));

            let mut resource = kustomization(vec![selector("nginx")]);
            resource.spec.retry_timeout = Some(0);
            let options = KustomizeOptions {
                retry_timeout: Duration::from_millis(20),
                ..options()
            };

            let service = KustomizeService::new(&client, &kustomize, &resource, &options);

            let actual = service.patch().await.unwrap();

            assert_eq!(actual.len(), 0);
            assert_eq!(attempts.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn stops_retrying_when_superseded() {
            let mut client = MockTestKubeClient::new();
            client
                .expect_fetch_selected()
                .times(1)
                .returning(|_, _| bail!("connection refused"));

            let kustomize = MockTestKustomize::new();
            let mut resource = kustomization(vec![selector("nginx")]);
            resource.spec.retry_timeout = Some(60_000);
            resource.metadata.generation = Some(1);

            let tracking = RetryTracking::default();
            let mut newer = resource.clone();
            newer.metadata.generation = Some(2);
            tracking.register(&newer).await;

            let options = options();

            let service =
                KustomizeService::new(&client, &kustomize, &resource, &options).tracking(&tracking);

            let err = service.patch().await.unwrap_err();

            assert_eq!(err.to_string(), "stopped retrying default/patch-nginx");
        }

        #[tokio::test]
        async fn builds_and_parses_kustomize_output() {
            let mut client = MockTestKubeClient::new();
            client
                .expect_fetch_selected()
                .returning(|_, _| Ok(Some(object("Deployment", "nginx", Some("default")))));

            let mut kustomize = MockTestKustomize::new();
            kustomize
                .expect_build()
                .with(always())
                .times(1)
                .returning(|workdir| {
                    let kustomization =
                        std::fs::read_to_string(workdir.join(Session::KUSTOMIZATION_PATH))
                            .unwrap();
                    assert!(kustomization.contains("namePrefix: prod-"));

                    let queried =
                        std::fs::read_to_string(workdir.join(Session::QUERIED_RESOURCES_PATH))
                            .unwrap();
                    assert!(queried.contains("name: nginx"));

                    Ok(indoc::indoc!(
                        "
                        apiVersion: apps/v1
                        kind: Deployment
                        metadata:
                          name: prod-nginx
                          namespace: default
                        "
                    )
                    .to_string())
                });

            let resource = kustomization(vec![selector("nginx")]);
            let options = options();

            let service = KustomizeService::new(&client, &kustomize, &resource, &options);

            let actual = service.patch().await.unwrap();

            assert_eq!(actual.len(), 1);
            assert_eq!(actual[0].metadata.name.as_deref(), Some("prod-nginx"));
        }
    }

    mod apply {
        use super::*;
        use pretty_assertions::assert_eq;

        fn kustomize_returning(output: &'static str) -> MockTestKustomize {
            let mut kustomize = MockTestKustomize::new();
            kustomize
                .expect_build()
                .returning(move |_| Ok(output.to_string()));
            kustomize
        }

        #[tokio::test]
        async fn skips_kustomization_objects_and_applies_the_rest() {
            let mut client = MockTestKubeClient::new();
            client
                .expect_fetch_selected()
                .returning(|_, _| Ok(Some(object("Deployment", "nginx", Some("default")))));
            client
                .expect_apply()
                .withf(|object, field_manager| {
                    object.metadata.name.as_deref() == Some("prod-nginx")
                        && field_manager == "kustomize-operator"
                })
                .times(1)
                .returning(|object, _| Ok(object.clone()));

            let kustomize = kustomize_returning(indoc::indoc!(
                "
                apiVersion: apps/v1
                kind: Deployment
                metadata:
                  name: prod-nginx
                  namespace: default
                ---
                apiVersion: kustomize.siliconhills.dev/v1alpha1
                kind: Kustomization
                metadata:
                  name: nested
                  namespace: default
                "
            ));

            let resource = kustomization(vec![selector("nginx")]);
            let options = options();

            let service = KustomizeService::new(&client, &kustomize, &resource, &options);

            service.apply(None).await.unwrap();
        }

        #[tokio::test]
        async fn passes_owner_reference_to_applied_objects() {
            let mut client = MockTestKubeClient::new();
            client
                .expect_fetch_selected()
                .returning(|_, _| Ok(Some(object("Deployment", "nginx", Some("default")))));
            client
                .expect_apply()
                .withf(|object, _| {
                    object
                        .metadata
                        .owner_references
                        .as_ref()
                        .is_some_and(|refs| refs.iter().any(|r| r.uid == "owner-uid"))
                })
                .times(1)
                .returning(|object, _| Ok(object.clone()));

            let kustomize = kustomize_returning(indoc::indoc!(
                "
                apiVersion: apps/v1
                kind: Deployment
                metadata:
                  name: prod-nginx
                  namespace: default
                "
            ));

            let resource = kustomization(vec![selector("nginx")]);
            let options = options();

            let service = KustomizeService::new(&client, &kustomize, &resource, &options);

            service.apply(Some(&resource)).await.unwrap();
        }

        #[tokio::test]
        async fn object_without_namespace_is_error() {
            let mut client = MockTestKubeClient::new();
            client
                .expect_fetch_selected()
                .returning(|_, _| Ok(Some(object("Deployment", "nginx", Some("default")))));
            client.expect_apply().never();

            let kustomize = kustomize_returning(indoc::indoc!(
                "
                apiVersion: apps/v1
                kind: Deployment
                metadata:
                  name: prod-nginx
                "
            ));

            let resource = kustomization(vec![selector("nginx")]);
            let options = options();

            let service = KustomizeService::new(&client, &kustomize, &resource, &options);

            let err = service.apply(None).await.unwrap_err();

            assert_eq!(
                err.to_string(),
                "metadata.name and metadata.namespace must be set"
            );
        }

        #[tokio::test]
        async fn nothing_to_apply_is_noop() {
            let mut client = MockTestKubeClient::new();
            client.expect_apply().never();

            let kustomize = MockTestKustomize::new();
            let resource = kustomization(vec![]);
            let options = options();

            let service = KustomizeService::new(&client, &kustomize, &resource, &options);

            service.apply(None).await.unwrap();
        }
    }
}
