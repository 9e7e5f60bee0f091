use catalog_core::ResourceKind;

/// Server-level configuration for the operation pipeline.
///
/// Controls operation timeouts, concurrency limits, and which resource
/// services are mounted.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Identifier of this server instance, used in logs.
    pub node_id: String,
    /// Default timeout for operations in milliseconds. Callers may ask for
    /// less, never more.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
    /// Resource services to mount, in registration order.
    pub enabled_kinds: Vec<ResourceKind>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            enabled_kinds: ResourceKind::ALL.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_is_enabled_by_default() {
        let config = ServerConfig::default();
        assert_eq!(config.enabled_kinds, ResourceKind::ALL.to_vec());
        assert_eq!(config.default_operation_timeout_ms, 30_000);
    }
}
