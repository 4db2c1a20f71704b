use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ListMeta;
use kube::{core::ObjectList, CustomResource, Resource as _, ResourceExt as _};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::types::{
    ConfigMapArgs, GeneratorOptions, Image, Patch, PatchJson6902, PatchStrategicMerge, Replica,
    SecretArgs, Selector, TransformerConfig, Var,
};

pub const DOMAIN: &str = "siliconhills.dev";

pub const GROUP: &str = "kustomize";

pub const VERSION: &str = "v1alpha1";

pub const KIND: &str = "Kustomization";

/// `kustomize` -> `kustomize.siliconhills.dev`
pub fn group_for(group: &str) -> String {
    format!("{}.{}", group, DOMAIN)
}

/// kind から API のリソース名を推測する
///
/// 小文字にして末尾に `s` を付けるだけなので、discovery が使えないときのフォールバック用
pub fn kind_to_plural(kind: &str) -> String {
    let lowercased = kind.to_lowercase();

    if lowercased.ends_with('s') {
        lowercased
    } else {
        format!("{}s", lowercased)
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "kustomize.siliconhills.dev",
    version = "v1alpha1",
    kind = "Kustomization",
    plural = "kustomizations",
    shortname = "kust",
    namespaced,
    status = "KustomizationStatus",
    derive = "Default",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KustomizationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_generator: Option<Vec<ConfigMapArgs>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<TransformerConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crds: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_options: Option<GeneratorOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<Image>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_suffix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches: Option<Vec<Patch>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches_json6902: Option<Vec<PatchJson6902>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches_strategic_merge: Option<Vec<PatchStrategicMerge>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<Vec<Replica>>,

    /// パッチを当てる既存リソース
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<Selector>>,

    /// milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_generator: Option<Vec<SecretArgs>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<Vec<Var>>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display, JsonSchema)]
pub enum KustomizationStatusPhase {
    Failed,
    Pending,
    Succeeded,
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KustomizationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<KustomizationStatusPhase>,

    #[serde(default)]
    pub ready: bool,
}

impl KustomizationStatus {
    fn new(phase: KustomizationStatusPhase, message: impl Into<String>, ready: bool) -> Self {
        Self {
            last_update_time: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            message: Some(message.into()),
            phase: Some(phase),
            ready,
        }
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self::new(KustomizationStatusPhase::Pending, message, false)
    }

    pub fn succeeded(message: impl Into<String>) -> Self {
        Self::new(KustomizationStatusPhase::Succeeded, message, true)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(KustomizationStatusPhase::Failed, message, false)
    }
}

pub trait KustomizationExt {
    /// `namespace/name`
    fn full_name(&self) -> String;
}

impl KustomizationExt for Kustomization {
    fn full_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.name_any()),
            None => self.name_any(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KustomizationList {
    pub api_version: String,

    pub kind: String,

    #[serde(default)]
    pub metadata: ListMeta,

    #[serde(default)]
    pub items: Vec<Kustomization>,
}

impl Default for KustomizationList {
    fn default() -> Self {
        Self {
            api_version: Kustomization::api_version(&()).to_string(),
            kind: format!("{}List", KIND),
            metadata: ListMeta::default(),
            items: Vec::new(),
        }
    }
}

impl KustomizationList {
    pub fn new(items: Vec<Kustomization>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }
}

impl From<ObjectList<Kustomization>> for KustomizationList {
    fn from(list: ObjectList<Kustomization>) -> Self {
        Self {
            metadata: list.metadata,
            items: list.items,
            ..Default::default()
        }
    }
}
