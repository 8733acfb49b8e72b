//! Remote resource targets.

use std::fmt;
use std::str::FromStr;

use crate::error::UploaderError;

const SHAPE: &str = "must be of format 'plugin_type/plugin_name/resource_type/resource_name'";

/// Kind of plugin a resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginType {
    Automator,
    Provider,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Automator => "automatortypes",
            PluginType::Provider => "providertypes",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `plugin_type/plugin_name/resource_type/resource_name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub plugin_type: PluginType,
    pub plugin_name: String,
    pub resource_type: String,
    pub resource_name: String,
}

impl RemoteTarget {
    /// API path of the owning plugin, e.g. `automatortypes/chef-solo`.
    pub fn plugin_path(&self) -> String {
        format!("{}/{}", self.plugin_type, self.plugin_name)
    }

    /// API path of the resource itself.
    pub fn resource_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.plugin_path(),
            self.resource_type,
            self.resource_name
        )
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_path())
    }
}

impl FromStr for RemoteTarget {
    type Err = UploaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split('/').collect();

        let plugin_type = match segments[0].to_ascii_lowercase().as_str() {
            "automatortypes" => PluginType::Automator,
            "providertypes" => PluginType::Provider,
            _ => {
                return Err(UploaderError::invalid_target(
                    s,
                    "must begin with 'automatortypes/' or 'providertypes/'",
                ))
            }
        };

        let [_, plugin_name, resource_type, resource_name] = segments.as_slice() else {
            return Err(UploaderError::invalid_target(s, SHAPE));
        };
        if [plugin_name, resource_type, resource_name]
            .iter()
            .any(|segment| segment.is_empty())
        {
            return Err(UploaderError::invalid_target(s, SHAPE));
        }

        Ok(Self {
            plugin_type,
            plugin_name: plugin_name.to_string(),
            resource_type: resource_type.to_string(),
            resource_name: resource_name.to_string(),
        })
    }
}
