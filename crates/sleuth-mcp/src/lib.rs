mod client;

pub use client::{McpSession, McpToolProvider};

use std::sync::Arc;

use sleuth_core::config::McpConfig;
use sleuth_core::traits::ToolProvider;

/// Build a tool provider for the configured server, if any. With several
/// servers configured the one named `filesystem` wins, else the first by name.
pub fn provider_from_config(config: Option<&McpConfig>) -> Option<Arc<dyn ToolProvider>> {
    let servers = &config?.servers;
    let name = if servers.contains_key("filesystem") {
        "filesystem".to_string()
    } else {
        let mut names: Vec<&String> = servers.keys().collect();
        names.sort();
        names.first()?.to_string()
    };
    let server = servers.get(&name)?.clone();
    Some(Arc::new(McpToolProvider::new(name, server)))
}

#[cfg(test)]
mod tests {
    use sleuth_core::config::McpServerConfig;

    use super::*;

    #[test]
    fn test_provider_prefers_filesystem() {
        let mut config = McpConfig::default();
        config.servers.insert("alpha".into(), McpServerConfig::filesystem("./a"));
        config.servers.insert("filesystem".into(), McpServerConfig::filesystem("./files"));
        let provider = provider_from_config(Some(&config)).unwrap();
        assert_eq!(provider.name(), "filesystem");
    }

    #[test]
    fn test_no_servers_no_provider() {
        assert!(provider_from_config(None).is_none());
        assert!(provider_from_config(Some(&McpConfig::default())).is_none());
    }
}
