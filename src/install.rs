use serde::{Deserialize, Serialize};

/// Identifies one of the two managed YimMenu installations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Install {
    #[serde(rename = "v1")]
    Legacy,
    #[serde(rename = "v2")]
    Enhanced,
}

impl Default for Install {
    fn default() -> Self {
        Install::Legacy
    }
}

impl Install {
    pub fn display_name(self) -> &'static str {
        match self {
            Install::Legacy => "YimMenu",
            Install::Enhanced => "YimMenuV2",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Install::Legacy => "v1",
            Install::Enhanced => "v2",
        }
    }

    /// Directory name under the application-data root.
    pub fn data_dir_name(self) -> &'static str {
        self.display_name()
    }

    /// Index into per-installation slots (settings cache, path tables).
    pub fn index(self) -> usize {
        match self {
            Install::Legacy => 0,
            Install::Enhanced => 1,
        }
    }

    pub fn parse(raw: &str) -> Option<Install> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "v1" | "legacy" | "yimmenu" => Some(Install::Legacy),
            "v2" | "enhanced" | "yimmenuv2" => Some(Install::Enhanced),
            _ => None,
        }
    }
}

pub fn managed_installs() -> [Install; 2] {
    [Install::Legacy, Install::Enhanced]
}
