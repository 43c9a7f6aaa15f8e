//! Event context - ambient information attached to every message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Library name reported in `context.library`
pub const LIBRARY_NAME: &str = "analytics-rust";

/// Library version reported in `context.library` and the user agent
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Free-form key/value bag (event properties, user traits, integrations)
pub type Properties = Map<String, Value>;

/// User or group traits
pub type Traits = Map<String, Value>;

/// Per-destination enable/disable switches
pub type Integrations = Map<String, Value>;

/// Context attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    /// Reporting library, always overwritten at admission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<OsInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<ScreenInfo>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub locale: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timezone: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,

    #[serde(default, skip_serializing_if = "Traits::is_empty")]
    pub traits: Traits,

    /// Anything else, serialized inline next to the known fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Library descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub name: String,
    pub version: String,
}

impl LibraryInfo {
    /// Descriptor of this library
    pub fn current() -> Self {
        Self {
            name: LIBRARY_NAME.to_string(),
            version: LIBRARY_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenInfo {
    #[serde(default)]
    pub density: f64,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}
