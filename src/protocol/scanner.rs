use crate::devices::{Device, Discovery};
use crate::protocol::messages::{DISCOVERY_MESSAGE, DISCOVERY_PORT};
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Discovery socket error: {0}")]
    Socket(#[from] io::Error),
}

impl TryFrom<&[u8]> for Device {
    type Error = String;

    /// Parses a discovery reply of the form `<ip>,<mac>,<model>`.
    fn try_from(msg: &[u8]) -> Result<Self, Self::Error> {
        let reply = String::from_utf8_lossy(msg);
        let mut parts = reply.trim().splitn(3, ',');
        let address = parts.next().unwrap_or_default().trim();
        let id = parts.next().unwrap_or_default().trim();
        let model = parts.next().unwrap_or_default().trim();
        if address.parse::<IpAddr>().is_err() || id.is_empty() {
            return Err(format!("unexpected discovery reply '{}'", reply.trim()));
        }
        Ok(Device {
            address: address.to_string(),
            id: id.to_string(),
            model: model.to_string(),
        })
    }
}

/// UDP broadcast discovery for Magic Home controllers.
#[derive(Debug, Clone)]
pub struct Scanner {
    target: SocketAddr,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Self {
            target: SocketAddr::from((Ipv4Addr::BROADCAST, DISCOVERY_PORT)),
        }
    }

    /// Probes a single address (or a different broadcast address) instead of
    /// the limited broadcast address.
    pub fn with_target(target: SocketAddr) -> Self {
        Self { target }
    }

    /// Broadcasts the discovery probe and collects replies until `wait` elapses.
    pub async fn scan(&self, wait: Duration) -> Result<Vec<Device>, ScanError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        socket.send_to(DISCOVERY_MESSAGE, self.target).await?;

        let deadline = Instant::now() + wait;
        let mut data = vec![0u8; 1024];
        let mut result = Vec::new();
        loop {
            match timeout_at(deadline, socket.recv_from(&mut data)).await {
                Ok(Ok((len, source))) => {
                    debug!("Received {} bytes from {}", len, source);
                    // bulbs echo the probe back on some networks
                    if &data[..len] == DISCOVERY_MESSAGE {
                        continue;
                    }
                    match Device::try_from(&data[..len]) {
                        Ok(device) => {
                            info!("Magic Home device found: {:?}", device);
                            result.push(device);
                        }
                        Err(e) => warn!("Ignoring reply from {}: {}", source, e),
                    }
                }
                Ok(Err(e)) => return Err(ScanError::Socket(e)),
                Err(_) => break,
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl Discovery for Scanner {
    async fn discover(&self, wait: Duration) -> Result<Vec<Device>, ScanError> {
        self.scan(wait).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_discovery_reply() {
        let device = Device::try_from(&b"192.168.1.23,ACCF23A1B2C3,HF-LPB100-ZJ200"[..]).unwrap();
        assert_eq!(device.address, "192.168.1.23");
        assert_eq!(device.id, "ACCF23A1B2C3");
        assert_eq!(device.model, "HF-LPB100-ZJ200");
    }

    #[test]
    fn test_parse_discovery_reply_without_model() {
        let device = Device::try_from(&b"10.0.0.7,ACCF23000001\r\n"[..]).unwrap();
        assert_eq!(device.id, "ACCF23000001");
        assert_eq!(device.model, "");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Device::try_from(&b"+ok"[..]).is_err());
        assert!(Device::try_from(&b"not-an-ip,ACCF23,model"[..]).is_err());
        assert!(Device::try_from(&b"10.0.0.7"[..]).is_err());
    }

    #[tokio::test]
    async fn test_scan_collects_replies_until_timeout() {
        let bulb = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = bulb.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, source) = bulb.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], DISCOVERY_MESSAGE);
            bulb.send_to(b"127.0.0.1,ACCF23000001,AK001-ZJ2101", source)
                .await
                .unwrap();
            bulb.send_to(b"garbage", source).await.unwrap();
        });

        let devices = Scanner::with_target(target)
            .scan(Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "ACCF23000001");
    }

    #[tokio::test]
    async fn test_scan_without_replies_is_empty() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let devices = Scanner::with_target(silent.local_addr().unwrap())
            .scan(Duration::from_millis(100))
            .await
            .unwrap();
        assert!(devices.is_empty());
    }
}
