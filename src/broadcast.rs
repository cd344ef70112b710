use crate::color::ColorValue;
use crate::devices::Device;
use crate::protocol::client::{ControlOptions, MagicHomeControl, ProtocolError};
use async_trait::async_trait;
use tracing::{debug, error, info};

/// Pushes a color state to a set of devices.
///
/// Delivery is best effort: a device that cannot be reached is logged and
/// skipped, and nothing is reported back to the caller.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, devices: &[Device], value: &ColorValue);
}

pub struct MagicHomeDispatcher {
    options: ControlOptions,
}

impl MagicHomeDispatcher {
    pub fn new(options: ControlOptions) -> Self {
        Self { options }
    }

    async fn send_to(&self, device: &Device, value: &ColorValue) -> Result<(), ProtocolError> {
        let mut control = MagicHomeControl::connect(&device.address, self.options.clone()).await?;
        control.set_power(value.on).await?;
        let (red, green, blue) = value.effective_rgb();
        if let Some(state) = control.set_color(red, green, blue).await? {
            debug!("Device {} reports {:?}", device.address, state);
        }
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for MagicHomeDispatcher {
    async fn send(&self, devices: &[Device], value: &ColorValue) {
        info!("Setting color {:?} on {} devices", value, devices.len());
        for device in devices {
            if let Err(e) = self.send_to(device, value).await {
                error!("Could not send color to {}: {}", device.address, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{make_color_message, make_power_message, make_state_reply};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn device(address: String) -> Device {
        Device {
            address,
            id: "ACCF23000001".to_string(),
            model: String::new(),
        }
    }

    /// Accepts one session and returns the power and color frames it received.
    async fn fake_bulb(listener: TcpListener) -> (Vec<u8>, Vec<u8>) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut power = vec![0u8; 4];
        socket.read_exact(&mut power).await.unwrap();
        socket.write_all(&[0xf0, 0x71, power[1], 0x00]).await.unwrap();
        let mut color = vec![0u8; 8];
        socket.read_exact(&mut color).await.unwrap();
        let mut query = [0u8; 4];
        socket.read_exact(&mut query).await.unwrap();
        socket
            .write_all(&make_state_reply(power[1] == 0x23, color[1], color[2], color[3]))
            .await
            .unwrap();
        (power, color)
    }

    fn dispatcher() -> MagicHomeDispatcher {
        MagicHomeDispatcher::new(
            ControlOptions::builder()
                .connect_timeout(Duration::from_millis(300))
                .command_timeout(Duration::from_millis(300))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_powered_off_sends_black() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let bulb = tokio::spawn(fake_bulb(listener));

        let value = ColorValue {
            red: 10,
            green: 20,
            blue: 30,
            on: false,
        };
        dispatcher().send(&[device(addr)], &value).await;

        let (power, color) = bulb.await.unwrap();
        assert_eq!(power, make_power_message(false));
        assert_eq!(color, make_color_message(0, 0, 0));
    }

    #[tokio::test]
    async fn test_unreachable_device_does_not_stop_the_rest() {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap().to_string();
        drop(dead);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let bulb = tokio::spawn(fake_bulb(listener));

        let value = ColorValue {
            red: 1,
            green: 2,
            blue: 3,
            on: true,
        };
        dispatcher()
            .send(&[device(dead_addr), device(addr)], &value)
            .await;

        let (power, color) = bulb.await.unwrap();
        assert_eq!(power, make_power_message(true));
        assert_eq!(color, make_color_message(1, 2, 3));
    }
}
