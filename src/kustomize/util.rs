use kube::api::DynamicObject;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::Error;

static DOCUMENT_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^-{3,}[ \t]*\r?$").expect("invalid document separator regex"));

/// リソースを `---` 区切りの YAML にする
pub fn resources_to_string(resources: &[DynamicObject]) -> Result<String, Error> {
    let documents = resources
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(documents.join("---\n"))
}

/// `---` (3つ以上のダッシュ) だけの行で区切られた YAML をパースする
///
/// 空のドキュメントは読み飛ばす
pub fn string_to_resources(s: &str) -> Result<Vec<Value>, Error> {
    let mut resources = Vec::new();

    for document in DOCUMENT_SEPARATOR.split(s) {
        if is_blank_document(document) {
            continue;
        }

        let value: Value = serde_yaml::from_str(document)?;

        if !value.is_null() {
            resources.push(value);
        }
    }

    Ok(resources)
}

fn is_blank_document(document: &str) -> bool {
    document
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with('#'))
}

/// クラスタから取得したリソースをパッチと適用の入力に使える形にする
///
/// server-side apply は managedFields 付きのオブジェクトを受け付けないため、
/// サーバが管理するフィールドを取り除く
pub fn sanitize_resource(mut resource: DynamicObject) -> DynamicObject {
    let metadata = &mut resource.metadata;

    metadata.managed_fields = None;
    metadata.resource_version = None;
    metadata.uid = None;
    metadata.creation_timestamp = None;
    metadata.generation = None;

    if let Value::Object(data) = &mut resource.data {
        data.remove("status");
    }

    resource
}
