//! Capabilities: the names sandboxed code may reference.

use serde::{Deserialize, Serialize};

/// A named primitive exposed to code running inside an isolation unit.
///
/// The wire form is the bare name as sandboxed code spells it (`"console"`,
/// `"Math"`, ...). `Custom(String)` carries names the runtime does not ship
/// an implementation for; granting one makes the reference legal but calling
/// it still fails inside the unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Capability {
    Console,
    Math,
    Json,
    Date,
    Fetch,
    Fs,
    Custom(String),
}

impl Capability {
    /// The identifier sandboxed code uses to reach this capability.
    pub fn name(&self) -> &str {
        match self {
            Capability::Console => "console",
            Capability::Math => "Math",
            Capability::Json => "JSON",
            Capability::Date => "Date",
            Capability::Fetch => "fetch",
            Capability::Fs => "fs",
            Capability::Custom(name) => name,
        }
    }

    /// Resolve an identifier to a capability. Unknown names become `Custom`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "console" => Capability::Console,
            "Math" => Capability::Math,
            "JSON" => Capability::Json,
            "Date" => Capability::Date,
            "fetch" => Capability::Fetch,
            "fs" => Capability::Fs,
            other => Capability::Custom(other.to_string()),
        }
    }

    /// Whether the policy must also grant network access.
    pub fn requires_network(&self) -> bool {
        matches!(self, Capability::Fetch)
    }

    /// Whether the policy must also grant file access.
    pub fn requires_files(&self) -> bool {
        matches!(self, Capability::Fs)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for Capability {
    fn from(name: String) -> Self {
        Capability::from_name(&name)
    }
}

impl From<Capability> for String {
    fn from(capability: Capability) -> Self {
        capability.name().to_string()
    }
}
