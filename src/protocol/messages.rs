//! Magic Home (LEDENET) command frames.
//!
//! Every frame sent over TCP ends with a checksum byte, the wrapping sum of
//! the preceding bytes.

use crate::protocol::client::ProtocolError;

pub const CONTROL_PORT: u16 = 5577;
pub const DISCOVERY_PORT: u16 = 48899;
pub const DISCOVERY_MESSAGE: &[u8] = b"HF-A11ASSISTHREAD";

pub const POWER_REPLY_LEN: usize = 4;
pub const STATE_REPLY_LEN: usize = 14;

const POWER_ON: u8 = 0x23;
const POWER_OFF: u8 = 0x24;

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn with_checksum(mut frame: Vec<u8>) -> Vec<u8> {
    frame.push(checksum(&frame));
    frame
}

pub fn make_power_message(on: bool) -> Vec<u8> {
    with_checksum(vec![0x71, if on { POWER_ON } else { POWER_OFF }, 0x0f])
}

/// Sets the RGB channels only, leaving warm white untouched (mask `0xF0`).
pub fn make_color_message(red: u8, green: u8, blue: u8) -> Vec<u8> {
    with_checksum(vec![0x31, red, green, blue, 0x00, 0xf0, 0x0f])
}

pub fn make_state_query_message() -> Vec<u8> {
    with_checksum(vec![0x81, 0x8a, 0x8b])
}

/// Device state as reported by a state query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightState {
    pub model: u8,
    pub on: bool,
    pub mode: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub warm_white: u8,
    pub version: u8,
}

impl TryFrom<&[u8]> for LightState {
    type Error = ProtocolError;

    fn try_from(msg: &[u8]) -> Result<Self, Self::Error> {
        if msg.len() != STATE_REPLY_LEN {
            return Err(ProtocolError::InvalidReply(format!(
                "expected {STATE_REPLY_LEN} bytes, got {}",
                msg.len()
            )));
        }
        if msg[0] != 0x81 {
            return Err(ProtocolError::InvalidReply(format!(
                "unexpected header 0x{:02X}",
                msg[0]
            )));
        }
        let expected = checksum(&msg[..STATE_REPLY_LEN - 1]);
        if msg[STATE_REPLY_LEN - 1] != expected {
            return Err(ProtocolError::InvalidReply(format!(
                "checksum mismatch: 0x{:02X} != 0x{expected:02X}",
                msg[STATE_REPLY_LEN - 1]
            )));
        }
        Ok(LightState {
            model: msg[1],
            on: msg[2] == POWER_ON,
            mode: msg[3],
            red: msg[6],
            green: msg[7],
            blue: msg[8],
            warm_white: msg[9],
            version: msg[10],
        })
    }
}

#[cfg(test)]
pub(crate) fn make_state_reply(on: bool, red: u8, green: u8, blue: u8) -> Vec<u8> {
    with_checksum(vec![
        0x81,
        0x44,
        if on { POWER_ON } else { POWER_OFF },
        0x61,
        0x01,
        0x01,
        red,
        green,
        blue,
        0x00,
        0x04,
        0x00,
        0x0f,
    ])
}
