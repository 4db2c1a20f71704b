use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use kube::api::DynamicObject;
use serde::Serialize;
use tempfile::TempDir;
use tokio::fs;

use crate::{
    api::v1alpha1::{
        ConfigMapArgs, GeneratorOptions, Image, KustomizationSpec, Patch, PatchJson6902, Replica,
        SecretArgs, TransformerConfig, Var,
    },
    error::Error,
};

use super::util::resources_to_string;

/// `kustomize build` 用の一時ディレクトリ
///
/// drop か [`Session::cleanup`] でディレクトリごと削除される
#[derive(Debug)]
pub struct Session {
    workdir: TempDir,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KustomizationFile<'a> {
    resources: [&'static str; 1],

    configurations: [&'static str; 1],

    #[serde(skip_serializing_if = "Option::is_none")]
    common_labels: Option<&'a BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    crds: Option<&'a Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<&'a Vec<Image>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    name_prefix: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    name_suffix: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    patches: Option<&'a Vec<Patch>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    replicas: Option<&'a Vec<Replica>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    vars: Option<&'a Vec<Var>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    secret_generator: Option<&'a Vec<SecretArgs>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    common_annotations: Option<&'a BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    config_map_generator: Option<&'a Vec<ConfigMapArgs>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    generator_options: Option<&'a GeneratorOptions>,

    #[serde(skip_serializing_if = "Option::is_none")]
    patches_json6902: Option<&'a Vec<PatchJson6902>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    patches_strategic_merge: Option<&'a Vec<String>>,
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

impl<'a> From<&'a KustomizationSpec> for KustomizationFile<'a> {
    fn from(spec: &'a KustomizationSpec) -> Self {
        Self {
            resources: [Session::QUERIED_RESOURCES_PATH],
            configurations: [Session::KUSTOMIZE_CONFIG_PATH],
            common_labels: spec.common_labels.as_ref(),
            crds: spec.crds.as_ref(),
            images: spec.images.as_ref(),
            name_prefix: non_empty(&spec.name_prefix),
            name_suffix: non_empty(&spec.name_suffix),
            namespace: non_empty(&spec.namespace),
            patches: spec.patches.as_ref(),
            replicas: spec.replicas.as_ref(),
            vars: spec.vars.as_ref(),
            secret_generator: spec.secret_generator.as_ref(),
            common_annotations: spec.common_annotations.as_ref(),
            config_map_generator: spec.config_map_generator.as_ref(),
            generator_options: spec.generator_options.as_ref(),
            patches_json6902: spec.patches_json6902.as_ref(),
            patches_strategic_merge: spec.patches_strategic_merge.as_ref(),
        }
    }
}

impl Session {
    pub const QUERIED_RESOURCES_PATH: &'static str = "resources/_queried.yaml";

    pub const KUSTOMIZATION_PATH: &'static str = "kustomization.yaml";

    pub const KUSTOMIZE_CONFIG_PATH: &'static str = "kustomizeconfig.yaml";

    pub fn new() -> Result<Self, Error> {
        let workdir = tempfile::Builder::new()
            .prefix("kustomize-operator-")
            .tempdir()?;

        Ok(Self { workdir })
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// ワークディレクトリ配下のパスを返し、親ディレクトリを作成する
    async fn path(&self, relative: &str) -> Result<PathBuf, Error> {
        let path = self.workdir.path().join(relative);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        Ok(path)
    }

    pub async fn set_resources(&self, resources: &[DynamicObject]) -> Result<(), Error> {
        let path = self.path(Self::QUERIED_RESOURCES_PATH).await?;

        fs::write(path, resources_to_string(resources)?).await?;

        Ok(())
    }

    pub async fn set_kustomization(&self, spec: &KustomizationSpec) -> Result<(), Error> {
        let kustomization_path = self.path(Self::KUSTOMIZATION_PATH).await?;
        let kustomize_config_path = self.path(Self::KUSTOMIZE_CONFIG_PATH).await?;

        let kustomization = KustomizationFile::from(spec);

        let default_config = TransformerConfig::default();
        let kustomize_config = spec.configuration.as_ref().unwrap_or(&default_config);

        fs::write(kustomization_path, serde_yaml::to_string(&kustomization)?).await?;
        fs::write(kustomize_config_path, serde_yaml::to_string(kustomize_config)?).await?;

        Ok(())
    }

    pub async fn cleanup(self) -> Result<(), Error> {
        let workdir = self.workdir;

        tokio::task::spawn_blocking(move || workdir.close())
            .await
            .map_err(std::io::Error::other)??;

        Ok(())
    }
}
