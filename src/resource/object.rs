use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::Deserialize;
use serde::Serialize;

use super::parse_resource_version;
use crate::Result;
use crate::WatchError;

/// Identity and versioning metadata of a resource
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    /// Empty for cluster-scoped resources
    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub uid: String,

    /// Decimal encoding of a monotonically increasing u64
    #[serde(default)]
    pub resource_version: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn resource_version_u64(&self) -> Result<u64> {
        parse_resource_version(&self.resource_version)
    }

    pub fn set_resource_version(
        &mut self,
        resource_version: impl Into<String>,
    ) {
        self.resource_version = resource_version.into();
    }
}

/// A resource that can flow through a watch
///
/// `meta()` returning `None` models an object from which no accessor can be
/// obtained; the watch engine drops such events for the affected node.
pub trait Resource: Clone + Debug + Send + Sync + 'static {
    fn meta(&self) -> Option<&ObjectMeta>;

    fn meta_mut(&mut self) -> Option<&mut ObjectMeta>;
}

/// Returns the metadata of `obj` or `MalformedObject`
pub fn accessor<O: Resource>(obj: &O) -> Result<&ObjectMeta> {
    obj.meta().ok_or_else(|| WatchError::MalformedObject.into())
}

pub fn accessor_mut<O: Resource>(obj: &mut O) -> Result<&mut ObjectMeta> {
    obj.meta_mut().ok_or_else(|| WatchError::MalformedObject.into())
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    pub api_version: String,
    pub kind: String,
}

/// Schemaless resource: type information, metadata and an arbitrary JSON body
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DynamicObject {
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,

    #[serde(default)]
    pub data: serde_json::Value,
}

impl DynamicObject {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            type_meta: TypeMeta {
                api_version: "v1".to_string(),
                kind: kind.into(),
            },
            metadata: Some(ObjectMeta {
                name: name.into(),
                ..Default::default()
            }),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_namespace(
        mut self,
        namespace: impl Into<String>,
    ) -> Self {
        if let Some(meta) = self.metadata.as_mut() {
            meta.namespace = namespace.into();
        }
        self
    }

    pub fn with_resource_version(
        mut self,
        resource_version: u64,
    ) -> Self {
        if let Some(meta) = self.metadata.as_mut() {
            meta.resource_version = resource_version.to_string();
        }
        self
    }

    pub fn with_label(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        if let Some(meta) = self.metadata.as_mut() {
            meta.labels.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_data(
        mut self,
        data: serde_json::Value,
    ) -> Self {
        self.data = data;
        self
    }
}

impl Resource for DynamicObject {
    fn meta(&self) -> Option<&ObjectMeta> {
        self.metadata.as_ref()
    }

    fn meta_mut(&mut self) -> Option<&mut ObjectMeta> {
        self.metadata.as_mut()
    }
}
