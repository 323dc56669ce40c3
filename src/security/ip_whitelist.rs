use anyhow::Result;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct IpWhitelist {
    allowed_networks: Arc<RwLock<Vec<IpNetwork>>>,
    config_path: PathBuf,
}

impl IpWhitelist {
    /// Builds the whitelist from the settings-provided IP/CIDR list.
    pub fn new(config_path: PathBuf, allowed_ips: Vec<String>) -> Result<Self> {
        let networks = Self::parse_ip_list(&allowed_ips)?;
        
        let whitelist = Self {
            allowed_networks: Arc::new(RwLock::new(networks)),
            config_path,
        };
        
        Ok(whitelist)
    }
    
    /// Parses a single IP or CIDR per entry.
    fn parse_ip_list(ips: &[String]) -> Result<Vec<IpNetwork>> {
        let mut networks = Vec::new();
        
        for ip_str in ips {
            let ip_str = ip_str.trim();
            
            // Try parse as CIDR first
            match ip_str.parse::<IpNetwork>() {
                Ok(network) => {
                    networks.push(network);
                    debug!("Added network: {}", network);
                }
                Err(_) => {
                    // Try parse as single IP
                    if let Ok(ip) = ip_str.parse::<IpAddr>() {
                        let network = match ip {
                            IpAddr::V4(ipv4) => IpNetwork::V4(
                                ipnetwork::Ipv4Network::new(ipv4, 32).unwrap()
                            ),
                            IpAddr::V6(ipv6) => IpNetwork::V6(
                                ipnetwork::Ipv6Network::new(ipv6, 128).unwrap()
                            ),
                        };
                        networks.push(network);
                        debug!("Added single IP: {}", ip);
                    } else {
                        warn!("Invalid IP/CIDR format: {}", ip_str);
                    }
                }
            }
        }
        
        Ok(networks)
    }
    
    /// Returns whether `ip` matches an entry in the whitelist.
    pub async fn is_allowed(&self, ip: IpAddr) -> bool {
        let networks = self.allowed_networks.read().await;
        
        for network in networks.iter() {
            if network.contains(ip) {
                debug!("IP {} matched network {}", ip, network);
                return true;
            }
        }
        
        warn!("IP {} not in whitelist", ip);
        false
    }
    
    /// Replaces the whitelist in place (manual trigger).
    pub async fn reload(&self, new_ips: Vec<String>) -> Result<()> {
        let networks = Self::parse_ip_list(&new_ips)?;

        let mut allowed = self.allowed_networks.write().await;
        *allowed = networks;

        info!("IP whitelist reloaded: {} entries", allowed.len());
        Ok(())
    }

    /// Starts a hot-reload watcher on `config_path`.
    // TODO: wire this to an actual on-disk whitelist file; for now the
    // whitelist is fixed at startup from settings and only `reload` changes it.
    pub fn start_watcher(self) -> Result<()> {
        info!(path = %self.config_path.display(), "IP whitelist file watcher not yet wired, using static settings list");
        Ok(())
    }

    /// Returns the current whitelist entries as strings.
    pub async fn get_whitelist(&self) -> Vec<String> {
        let networks = self.allowed_networks.read().await;
        networks.iter().map(|n| n.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_exact_ip_and_cidr_range() {
        let whitelist = IpWhitelist::new(
            PathBuf::from("config/ip_whitelist.toml"),
            vec!["10.0.0.5".to_string(), "192.168.1.0/24".to_string()],
        )
        .unwrap();

        assert!(whitelist.is_allowed("10.0.0.5".parse().unwrap()).await);
        assert!(whitelist.is_allowed("192.168.1.42".parse().unwrap()).await);
        assert!(!whitelist.is_allowed("172.16.0.1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn reload_replaces_existing_entries() {
        let whitelist = IpWhitelist::new(PathBuf::from("config/ip_whitelist.toml"), vec!["10.0.0.5".to_string()])
            .unwrap();
        assert!(whitelist.is_allowed("10.0.0.5".parse().unwrap()).await);

        whitelist.reload(vec!["10.0.0.6".to_string()]).await.unwrap();
        assert!(!whitelist.is_allowed("10.0.0.5".parse().unwrap()).await);
        assert!(whitelist.is_allowed("10.0.0.6".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn invalid_entries_are_skipped_not_fatal() {
        let whitelist = IpWhitelist::new(
            PathBuf::from("config/ip_whitelist.toml"),
            vec!["not-an-ip".to_string(), "10.0.0.5".to_string()],
        )
        .unwrap();
        assert!(whitelist.is_allowed("10.0.0.5".parse().unwrap()).await);
    }
}
