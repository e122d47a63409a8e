//! meshcheck core types: resource kinds, snapshot entries and the message catalog.

#![forbid(unsafe_code)]

use std::fmt;

use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub mod error;
pub mod istio;
pub mod msg;

pub use error::Error;
pub use istio::{Gateway, GatewaySpec, VirtualService, VirtualServiceSpec};

pub mod prelude {
    pub use super::msg::{Level, Message, MessageType, Origin};
    pub use super::{Entry, Error, Kind, Payload, Resource, ResourceName};
}

/// Resource kinds a snapshot can hold. Closed set: anything else is ignored at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    VirtualService,
    Gateway,
    Pod,
    MutatingWebhookConfiguration,
}

impl Kind {
    pub const ALL: [Kind; 4] = [
        Kind::VirtualService,
        Kind::Gateway,
        Kind::Pod,
        Kind::MutatingWebhookConfiguration,
    ];

    pub fn group(&self) -> &'static str {
        match self {
            Kind::VirtualService | Kind::Gateway => "networking.istio.io",
            Kind::Pod => "",
            Kind::MutatingWebhookConfiguration => "admissionregistration.k8s.io",
        }
    }

    /// Preferred version, used for listing and for decoding.
    pub fn version(&self) -> &'static str {
        match self {
            Kind::VirtualService | Kind::Gateway => "v1alpha3",
            Kind::Pod | Kind::MutatingWebhookConfiguration => "v1",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Kind::VirtualService => "VirtualService",
            Kind::Gateway => "Gateway",
            Kind::Pod => "Pod",
            Kind::MutatingWebhookConfiguration => "MutatingWebhookConfiguration",
        }
    }

    pub fn namespaced(&self) -> bool {
        !matches!(self, Kind::MutatingWebhookConfiguration)
    }

    /// Versions whose payload shape matches the typed model.
    pub fn accepts_version(&self, version: &str) -> bool {
        match self {
            Kind::VirtualService | Kind::Gateway => matches!(version, "v1alpha3" | "v1beta1" | "v1"),
            Kind::Pod => version == "v1",
            Kind::MutatingWebhookConfiguration => matches!(version, "v1" | "v1beta1"),
        }
    }

    /// GVK key in the `v1/Kind` or `group/v1/Kind` form.
    pub fn gvk_key(&self) -> String {
        if self.group().is_empty() {
            format!("{}/{}", self.version(), self.kind())
        } else {
            format!("{}/{}/{}", self.group(), self.version(), self.kind())
        }
    }

    pub fn from_gvk(group: &str, kind: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.group() == group && k.kind() == kind)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Identity of an entry within its kind: `namespace/name`, or a bare `name` when cluster-scoped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn new(namespace: &str, name: &str) -> Self {
        if namespace.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{}", namespace, name))
        }
    }

    /// Split into `(namespace, name)` at the first `/`. A bare name has an empty namespace.
    pub fn namespace_and_name(&self) -> (&str, &str) {
        match self.0.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => ("", self.0.as_str()),
        }
    }

    /// Resolve a short reference made from an entry living in `namespace`.
    ///
    /// `ns/name` is taken as-is; a bare `name` lands in the referencing namespace.
    pub fn resolve_reference(namespace: &str, reference: &str) -> Self {
        match reference.split_once('/') {
            Some((ns, name)) => Self::new(ns, name),
            None => Self::new(namespace, reference),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Typed payload of an entry, one variant per [`Kind`].
#[derive(Debug, Clone)]
pub enum Resource {
    VirtualService(Box<VirtualService>),
    Gateway(Box<Gateway>),
    Pod(Box<Pod>),
    MutatingWebhookConfiguration(Box<MutatingWebhookConfiguration>),
}

impl Resource {
    pub fn kind(&self) -> Kind {
        match self {
            Resource::VirtualService(_) => Kind::VirtualService,
            Resource::Gateway(_) => Kind::Gateway,
            Resource::Pod(_) => Kind::Pod,
            Resource::MutatingWebhookConfiguration(_) => Kind::MutatingWebhookConfiguration,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Resource::VirtualService(o) => &o.metadata,
            Resource::Gateway(o) => &o.metadata,
            Resource::Pod(o) => &o.metadata,
            Resource::MutatingWebhookConfiguration(o) => &o.metadata,
        }
    }

    /// Decode an untyped manifest. Returns `Ok(None)` for kinds outside [`Kind::ALL`].
    pub fn from_json(raw: Json) -> Result<Option<Resource>, Error> {
        let api_version = raw
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .ok_or(Error::MissingField("apiVersion"))?
            .to_string();
        let kind_s = raw
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or(Error::MissingField("kind"))?
            .to_string();
        let (group, version) = api_version.split_once('/').unwrap_or(("", api_version.as_str()));
        let kind = match Kind::from_gvk(group, &kind_s) {
            Some(k) => k,
            None => return Ok(None),
        };
        if !kind.accepts_version(version) {
            return Err(Error::UnsupportedVersion { kind, version: version.to_string() });
        }
        let resource = match kind {
            Kind::VirtualService => Resource::VirtualService(Box::new(decode(kind, raw)?)),
            Kind::Gateway => Resource::Gateway(Box::new(decode(kind, raw)?)),
            Kind::Pod => Resource::Pod(Box::new(decode(kind, raw)?)),
            Kind::MutatingWebhookConfiguration => {
                Resource::MutatingWebhookConfiguration(Box::new(decode(kind, raw)?))
            }
        };
        Ok(Some(resource))
    }
}

// Older served versions share the typed shape; pin apiVersion to the one the type expects.
fn decode<K>(kind: Kind, mut raw: Json) -> Result<K, Error>
where
    K: kube::Resource<DynamicType = ()> + DeserializeOwned,
{
    if let Some(obj) = raw.as_object_mut() {
        obj.insert("apiVersion".into(), Json::String(K::api_version(&()).into_owned()));
    }
    serde_json::from_value(raw).map_err(|source| Error::Decode { kind, source })
}

/// Links a payload type to its [`Resource`] variant.
pub trait Payload: Sized {
    const KIND: Kind;
    fn cast(resource: &Resource) -> Option<&Self>;
}

impl Payload for VirtualService {
    const KIND: Kind = Kind::VirtualService;
    fn cast(resource: &Resource) -> Option<&Self> {
        match resource { Resource::VirtualService(o) => Some(&**o), _ => None }
    }
}

impl Payload for Gateway {
    const KIND: Kind = Kind::Gateway;
    fn cast(resource: &Resource) -> Option<&Self> {
        match resource { Resource::Gateway(o) => Some(&**o), _ => None }
    }
}

impl Payload for Pod {
    const KIND: Kind = Kind::Pod;
    fn cast(resource: &Resource) -> Option<&Self> {
        match resource { Resource::Pod(o) => Some(&**o), _ => None }
    }
}

impl Payload for MutatingWebhookConfiguration {
    const KIND: Kind = Kind::MutatingWebhookConfiguration;
    fn cast(resource: &Resource) -> Option<&Self> {
        match resource { Resource::MutatingWebhookConfiguration(o) => Some(&**o), _ => None }
    }
}

/// One resource in a snapshot.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: ResourceName,
    pub resource: Resource,
}

impl Entry {
    /// Build an entry, placing namespaced objects without a namespace into `default_namespace`.
    pub fn new(resource: Resource, default_namespace: &str) -> Result<Self, Error> {
        let kind = resource.kind();
        let meta = resource.meta();
        let local = meta
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or(Error::MissingField("metadata.name"))?;
        let name = if kind.namespaced() {
            let ns = meta.namespace.as_deref().filter(|n| !n.is_empty()).unwrap_or(default_namespace);
            ResourceName::new(ns, local)
        } else {
            ResourceName::new("", local)
        };
        Ok(Self { name, resource })
    }

    pub fn kind(&self) -> Kind {
        self.resource.kind()
    }

    pub fn namespace(&self) -> &str {
        self.name.namespace_and_name().0
    }

    /// Name without namespace, straight from object metadata.
    pub fn local_name(&self) -> &str {
        self.resource.meta().name.as_deref().unwrap_or("")
    }
}
