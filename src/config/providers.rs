//! Remote tool provider configuration.

use std::collections::HashSet;

use super::errors::ConfigError;
use crate::mcp_client::types::{McpInfo, Transport};

/// Configured providers in load order.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<McpInfo>,
}

impl ProviderRegistry {
    /// Names must be unique; `stdio` needs a command and `sse` a server URI.
    pub fn new(providers: Vec<McpInfo>) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        for p in &providers {
            if !names.insert(p.name.as_str()) {
                return Err(ConfigError::Integrity {
                    reason: format!("duplicate provider name '{}'", p.name),
                });
            }
            validate(p)?;
        }
        Ok(Self { providers })
    }

    pub fn get(&self, name: &str) -> Option<&McpInfo> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &McpInfo> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

pub fn validate(info: &McpInfo) -> Result<(), ConfigError> {
    let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    let ok = match info.transport {
        Transport::Stdio => present(&info.command),
        Transport::Sse => present(&info.server_uri),
    };
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Integrity {
            reason: format!(
                "provider '{}' with transport {} is missing its {}",
                info.name,
                info.transport.as_str(),
                match info.transport {
                    Transport::Stdio => "command",
                    Transport::Sse => "server_uri",
                }
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sse(name: &str, uri: Option<&str>) -> McpInfo {
        McpInfo {
            name: name.into(),
            transport: Transport::Sse,
            description: None,
            server_uri: uri.map(String::from),
            command: None,
            args: vec![],
            envs: HashMap::new(),
        }
    }

    #[test]
    fn test_transport_requirements() {
        assert!(ProviderRegistry::new(vec![sse("a", Some("http://x/sse"))]).is_ok());
        assert!(ProviderRegistry::new(vec![sse("a", None)]).is_err());

        let mut stdio = sse("b", None);
        stdio.transport = Transport::Stdio;
        assert!(ProviderRegistry::new(vec![stdio.clone()]).is_err());
        stdio.command = Some("uvx".into());
        assert!(ProviderRegistry::new(vec![stdio]).is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let reg = ProviderRegistry::new(vec![
            sse("a", Some("http://x/sse")),
            sse("a", Some("http://y/sse")),
        ]);
        assert!(matches!(reg.unwrap_err(), ConfigError::Integrity { .. }));
    }
}
