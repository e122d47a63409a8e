//! Message catalog and diagnostic values produced by analyzers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{Entry, Kind, ResourceName};

/// Severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Info => "Info",
            Level::Warning => "Warning",
            Level::Error => "Error",
        };
        f.write_str(s)
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            other => Err(format!("unknown level {:?} (expected info, warning or error)", other)),
        }
    }
}

/// A catalog entry: stable code, default severity and a `{0}`-style template.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MessageType {
    pub code: &'static str,
    pub level: Level,
    pub template: &'static str,
}

pub static INTERNAL_ERROR: MessageType = MessageType {
    code: "MC0001",
    level: Level::Error,
    template: "Internal error: {0}",
};

pub static REFERENCED_RESOURCE_NOT_FOUND: MessageType = MessageType {
    code: "MC0101",
    level: Level::Error,
    template: "Referenced {0} not found: \"{1}\"",
};

pub static CATALOG: [&MessageType; 2] = [&INTERNAL_ERROR, &REFERENCED_RESOURCE_NOT_FOUND];

/// The entry a message is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Origin {
    pub kind: Kind,
    pub name: ResourceName,
}

impl Origin {
    pub fn of(entry: &Entry) -> Self {
        Self { kind: entry.kind(), name: entry.name.clone() }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub ty: &'static MessageType,
    pub origin: Origin,
    pub params: SmallVec<[String; 2]>,
}

impl Message {
    pub fn new(ty: &'static MessageType, entry: &Entry, params: SmallVec<[String; 2]>) -> Self {
        Self { ty, origin: Origin::of(entry), params }
    }

    pub fn code(&self) -> &'static str {
        self.ty.code
    }

    pub fn level(&self) -> Level {
        self.ty.level
    }

    /// Substitute `{N}` placeholders in a single pass; unknown indices stay verbatim.
    pub fn render(&self) -> String {
        let tpl = self.ty.template;
        let mut out = String::with_capacity(tpl.len() + 16);
        let mut rest = tpl;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let param = after
                .find('}')
                .and_then(|close| after[..close].parse::<usize>().ok().map(|i| (i, close)))
                .and_then(|(i, close)| self.params.get(i).map(|p| (p, close)));
            match param {
                Some((p, close)) => {
                    out.push_str(p);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ({}) {}", self.level(), self.code(), self.origin, self.render())
    }
}

pub fn internal_error(entry: &Entry, detail: impl Into<String>) -> Message {
    Message::new(&INTERNAL_ERROR, entry, smallvec::smallvec![detail.into()])
}

pub fn referenced_resource_not_found(entry: &Entry, ref_kind: &str, ref_name: &str) -> Message {
    Message::new(
        &REFERENCED_RESOURCE_NOT_FOUND,
        entry,
        smallvec::smallvec![ref_kind.to_string(), ref_name.to_string()],
    )
}
