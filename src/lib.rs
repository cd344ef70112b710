mod protocol;

pub mod broadcast;
pub mod color;
pub mod devices;
pub mod logging;
pub mod persistence;
pub mod settings;
pub mod web;

pub use protocol::client::{ControlOptions, ControlOptionsBuilder, MagicHomeControl, ProtocolError};
pub use protocol::messages::LightState;
pub use protocol::scanner::{ScanError, Scanner};
