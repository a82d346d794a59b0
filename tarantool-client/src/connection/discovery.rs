//! Node address discovery.

use std::net::SocketAddr;

use async_trait::async_trait;
use tarantool_core::Result;

use crate::config::default_address;

/// Source of the node addresses the client connects to.
///
/// The connection manager polls the provider at the start of every connect
/// cycle, so a provider returning a changed list makes the client follow
/// topology changes on the next reconnect.
#[async_trait]
pub trait AddressProvider: Send + Sync + std::fmt::Debug {
    /// Returns the current list of node addresses.
    async fn get_addresses(&self) -> Result<Vec<SocketAddr>>;
}

/// Address provider returning a fixed list.
#[derive(Debug, Clone)]
pub struct StaticAddressProvider {
    addresses: Vec<SocketAddr>,
}

impl StaticAddressProvider {
    /// Creates a provider returning the given addresses.
    pub fn new(addresses: Vec<SocketAddr>) -> Self {
        Self { addresses }
    }

    /// Creates a provider for a single node.
    pub fn from_address(address: SocketAddr) -> Self {
        Self::new(vec![address])
    }

    /// Returns the configured addresses.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }
}

impl Default for StaticAddressProvider {
    fn default() -> Self {
        Self::from_address(default_address())
    }
}

#[async_trait]
impl AddressProvider for StaticAddressProvider {
    async fn get_addresses(&self) -> Result<Vec<SocketAddr>> {
        Ok(self.addresses.clone())
    }
}

impl<T> From<T> for StaticAddressProvider
where
    T: IntoIterator<Item = SocketAddr>,
{
    fn from(addresses: T) -> Self {
        Self::new(addresses.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_returns_addresses() {
        let addr1: SocketAddr = "192.168.1.1:3301".parse().unwrap();
        let addr2: SocketAddr = "192.168.1.2:3301".parse().unwrap();

        let provider = StaticAddressProvider::new(vec![addr1, addr2]);
        let result = provider.get_addresses().await.unwrap();

        assert_eq!(result, vec![addr1, addr2]);
    }

    #[tokio::test]
    async fn test_static_provider_default() {
        let provider = StaticAddressProvider::default();
        let result = provider.get_addresses().await.unwrap();

        assert_eq!(result, vec!["127.0.0.1:3301".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_static_provider_from_array() {
        let addrs: [SocketAddr; 2] = [
            "10.0.0.1:3301".parse().unwrap(),
            "10.0.0.2:3301".parse().unwrap(),
        ];

        let provider: StaticAddressProvider = addrs.into();
        assert_eq!(provider.addresses(), &addrs[..]);
    }

    #[tokio::test]
    async fn test_static_provider_empty() {
        let provider = StaticAddressProvider::new(vec![]);
        assert!(provider.get_addresses().await.unwrap().is_empty());
    }
}
