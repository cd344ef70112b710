use crate::protocol::messages::{
    CONTROL_PORT, LightState, POWER_REPLY_LEN, STATE_REPLY_LEN, make_color_message,
    make_power_message, make_state_query_message,
};
use derive_builder::Builder;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Device {0} is unreachable: {1}")]
    Unreachable(String, String),
    #[error("Device {0} did not answer in time")]
    Timeout(String),
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),
    #[error("Invalid reply: {0}")]
    InvalidReply(String),
}

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Builder, Debug, Clone)]
pub struct ControlOptions {
    #[builder(default = "CONTROL_PORT")]
    pub port: u16,
    #[builder(default = "DEFAULT_CONNECT_TIMEOUT")]
    pub connect_timeout: Duration,
    #[builder(default = "DEFAULT_COMMAND_TIMEOUT")]
    pub command_timeout: Duration,
    #[builder(default = "true")]
    pub wait_for_reply: bool,
}

impl ControlOptions {
    pub fn builder() -> ControlOptionsBuilder {
        ControlOptionsBuilder::default()
    }
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            port: CONTROL_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            wait_for_reply: true,
        }
    }
}

/// Resolves a device address to `host:port`. An address that already names a
/// port is kept; bare IPv6 addresses are bracketed.
fn control_target(address: &str, port: u16) -> String {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return addr.to_string();
    }
    match address.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{address}:{port}"),
    }
}

/// A single TCP control session with one bulb.
pub struct MagicHomeControl {
    stream: TcpStream,
    address: String,
    options: ControlOptions,
}

impl MagicHomeControl {
    pub async fn connect(address: &str, options: ControlOptions) -> Result<Self, ProtocolError> {
        let target = control_target(address, options.port);
        let stream = timeout(options.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| ProtocolError::Timeout(address.to_string()))?
            .map_err(|e| ProtocolError::Unreachable(address.to_string(), e.to_string()))?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", target);
        Ok(Self {
            stream,
            address: address.to_string(),
            options,
        })
    }

    pub async fn set_power(&mut self, on: bool) -> Result<(), ProtocolError> {
        self.send(&make_power_message(on)).await?;
        if self.options.wait_for_reply {
            self.read_reply(POWER_REPLY_LEN).await?;
        }
        Ok(())
    }

    /// Sets the RGB channels. With reply-wait enabled, returns the state the
    /// bulb reports afterwards.
    pub async fn set_color(
        &mut self,
        red: u8,
        green: u8,
        blue: u8,
    ) -> Result<Option<LightState>, ProtocolError> {
        self.send(&make_color_message(red, green, blue)).await?;
        if self.options.wait_for_reply {
            return self.query_state().await.map(Some);
        }
        Ok(None)
    }

    pub async fn query_state(&mut self) -> Result<LightState, ProtocolError> {
        self.send(&make_state_query_message()).await?;
        let reply = self.read_reply(STATE_REPLY_LEN).await?;
        LightState::try_from(reply.as_slice())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        timeout(self.options.command_timeout, self.stream.write_all(frame))
            .await
            .map_err(|_| ProtocolError::Timeout(self.address.clone()))??;
        Ok(())
    }

    async fn read_reply(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![0u8; len];
        timeout(self.options.command_timeout, self.stream.read_exact(&mut buf))
            .await
            .map_err(|_| ProtocolError::Timeout(self.address.clone()))??;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::make_state_reply;
    use tokio::net::TcpListener;

    fn options() -> ControlOptions {
        ControlOptions::builder()
            .connect_timeout(Duration::from_millis(500))
            .command_timeout(Duration::from_millis(500))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let options = ControlOptions::builder().build().unwrap();
        assert_eq!(options.port, CONTROL_PORT);
        assert_eq!(options.connect_timeout, Duration::from_millis(1500));
        assert!(options.wait_for_reply);
    }

    #[test]
    fn test_default_matches_builder() {
        let built = ControlOptions::builder().build().unwrap();
        let default = ControlOptions::default();
        assert_eq!(default.port, built.port);
        assert_eq!(default.connect_timeout, built.connect_timeout);
        assert_eq!(default.command_timeout, built.command_timeout);
        assert_eq!(default.wait_for_reply, built.wait_for_reply);
    }

    #[test]
    fn test_control_target() {
        assert_eq!(control_target("10.0.0.2", CONTROL_PORT), "10.0.0.2:5577");
        assert_eq!(control_target("10.0.0.2:6000", CONTROL_PORT), "10.0.0.2:6000");
        assert_eq!(control_target("fe80::1", CONTROL_PORT), "[fe80::1]:5577");
        assert_eq!(control_target("[fe80::1]:6000", CONTROL_PORT), "[fe80::1]:6000");
        assert_eq!(control_target("bulb.local", CONTROL_PORT), "bulb.local:5577");
    }

    #[tokio::test]
    async fn test_bare_ip_uses_configured_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let options = ControlOptions::builder()
            .port(port)
            .wait_for_reply(false)
            .build()
            .unwrap();
        MagicHomeControl::connect("127.0.0.1", options).await.unwrap();
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_set_power_and_color_against_fake_bulb() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let bulb = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut power = [0u8; 4];
            socket.read_exact(&mut power).await.unwrap();
            socket.write_all(&[0xf0, 0x71, 0x23, 0x84]).await.unwrap();
            let mut color = [0u8; 8];
            socket.read_exact(&mut color).await.unwrap();
            let mut query = [0u8; 4];
            socket.read_exact(&mut query).await.unwrap();
            socket
                .write_all(&make_state_reply(true, color[1], color[2], color[3]))
                .await
                .unwrap();
            (power, color, query)
        });

        let mut control = MagicHomeControl::connect(&addr.to_string(), options())
            .await
            .unwrap();
        control.set_power(true).await.unwrap();
        let state = control.set_color(10, 20, 30).await.unwrap().unwrap();
        assert!(state.on);
        assert_eq!((state.red, state.green, state.blue), (10, 20, 30));

        let (power, color, query) = bulb.await.unwrap();
        assert_eq!(power.to_vec(), make_power_message(true));
        assert_eq!(color.to_vec(), make_color_message(10, 20, 30));
        assert_eq!(query.to_vec(), make_state_query_message());
    }

    #[tokio::test]
    async fn test_silent_bulb_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _bulb = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut control = MagicHomeControl::connect(&addr.to_string(), options())
            .await
            .unwrap();
        assert!(matches!(
            control.set_power(false).await,
            Err(ProtocolError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = MagicHomeControl::connect(&addr.to_string(), options()).await;
        assert!(matches!(
            result,
            Err(ProtocolError::Unreachable(_, _)) | Err(ProtocolError::Timeout(_))
        ));
    }
}
