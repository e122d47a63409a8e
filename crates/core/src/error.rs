use thiserror::Error;

use crate::{Kind, ResourceName};

#[derive(Debug, Error)]
pub enum Error {
    #[error("manifest missing {0}")]
    MissingField(&'static str),
    #[error("unsupported {kind} version {version}")]
    UnsupportedVersion { kind: Kind, version: String },
    #[error("decoding {kind}: {source}")]
    Decode {
        kind: Kind,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate {kind} {name}")]
    DuplicateEntry { kind: Kind, name: ResourceName },
    #[error("parsing YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("converting YAML to JSON: {0}")]
    Json(#[from] serde_json::Error),
}
