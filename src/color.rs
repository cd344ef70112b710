//! The shared color/power state.
//!
//! Every mutation follows the same order: apply the update, persist the
//! snapshot, then broadcast the post-update value to the active devices.

use crate::broadcast::Dispatcher;
use crate::devices::DeviceRegistry;
use crate::persistence;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub const RED: &str = "red";
pub const GREEN: &str = "green";
pub const BLUE: &str = "blue";
pub const ON: &str = "on";

/// Recognized fields, in the order changes are reported.
pub const FIELDS: [&str; 4] = [RED, GREEN, BLUE, ON];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorValue {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub on: bool,
}

impl ColorValue {
    pub const DEFAULT: ColorValue = ColorValue {
        red: 255,
        green: 255,
        blue: 255,
        on: true,
    };

    /// The color a bulb should actually show: black while powered off.
    pub fn effective_rgb(&self) -> (u8, u8, u8) {
        if self.on {
            (self.red, self.green, self.blue)
        } else {
            (0, 0, 0)
        }
    }

    fn channel_mut(&mut self, field: &str) -> Option<&mut u8> {
        match field {
            RED => Some(&mut self.red),
            GREEN => Some(&mut self.green),
            BLUE => Some(&mut self.blue),
            _ => None,
        }
    }
}

impl Default for ColorValue {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub fn clamp(value: i64) -> u8 {
    value.clamp(0, 255) as u8
}

/// Coerces an arbitrary JSON value into a [`ColorValue`].
///
/// A candidate missing any field is replaced wholesale by the default. A
/// field of the wrong type is replaced by the default for that field only;
/// numbers that do not fit a byte count as the wrong type.
pub fn normalize(candidate: &Value) -> ColorValue {
    let default = ColorValue::DEFAULT;
    let Some(object) = candidate.as_object() else {
        error!("The color object is not an object. Resetting to default");
        return default;
    };
    if FIELDS.iter().any(|field| !object.contains_key(*field)) {
        error!("The color object has been corrupted. Resetting to default");
        return default;
    }
    let byte = |field: &str, fallback: u8| {
        object
            .get(field)
            .and_then(Value::as_u64)
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(fallback)
    };
    ColorValue {
        red: byte(RED, default.red),
        green: byte(GREEN, default.green),
        blue: byte(BLUE, default.blue),
        on: object.get(ON).and_then(Value::as_bool).unwrap_or(default.on),
    }
}

fn parse_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::String(s) => serde_json::from_str::<Value>(s).ok()?.as_bool(),
        _ => None,
    }
}

/// Whether `s` reads as a number at all: decimal, exponent or radix-prefixed.
fn is_numeric(s: &str) -> bool {
    let prefixes = [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)];
    if let Some((digits, radix)) = prefixes
        .iter()
        .find_map(|(prefix, radix)| s.strip_prefix(prefix).map(|d| (d, *radix)))
    {
        return !digits.is_empty() && digits.chars().all(|c| c.is_digit(radix));
    }
    s.chars().all(|c| c.is_ascii_digit() || "+-.eE".contains(c)) && s.parse::<f64>().is_ok()
}

/// Reads the leading integer of `s`, stopping at the first character that
/// is not a digit: `"7.9"` is 7, `"1e3"` is 1, `"0x1F"` is 31.
fn leading_integer(s: &str) -> Option<i64> {
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let (digits, radix) = match rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (rest, 10),
    };
    let mut value: Option<i64> = None;
    for c in digits.chars() {
        let Some(digit) = c.to_digit(radix) else {
            break;
        };
        let acc = value.unwrap_or(0);
        value = Some(acc.saturating_mul(i64::from(radix)).saturating_add(i64::from(digit)));
    }
    value.map(|v| if negative { -v } else { v })
}

fn parse_number(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || !is_numeric(s) {
                return None;
            }
            leading_integer(s)
        }
        _ => None,
    }
}

pub struct ColorState {
    value: RwLock<ColorValue>,
    /// Held from update through broadcast so devices see updates in order.
    send_gate: Mutex<()>,
    path: PathBuf,
    registry: Arc<DeviceRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ColorState {
    pub fn new(
        path: impl Into<PathBuf>,
        registry: Arc<DeviceRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
        initial: &Value,
    ) -> Self {
        let state = Self {
            value: RwLock::new(normalize(initial)),
            send_gate: Mutex::new(()),
            path: path.into(),
            registry,
            dispatcher,
        };
        state.persist(&state.value.read());
        state
    }

    /// Restores the state persisted at `path`, falling back to the default
    /// when the snapshot is missing or unreadable.
    pub fn open(
        path: impl Into<PathBuf>,
        registry: Arc<DeviceRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let path = path.into();
        let initial = if persistence::exists(&path) {
            match persistence::load::<Value>(&path) {
                Ok(value) => {
                    info!("Deserialized color {}", value);
                    value
                }
                Err(e) => {
                    error!("Failed to load color from {:?}, using default: {}", path, e);
                    Value::Null
                }
            }
        } else {
            serde_json::json!(ColorValue::DEFAULT)
        };
        Self::new(path, registry, dispatcher, &initial)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> ColorValue {
        *self.value.read()
    }

    /// Applies a partial update and returns the names of the fields that
    /// actually changed. Unrecognized keys and unparsable values are dropped.
    pub async fn set_fields(&self, options: &Map<String, Value>) -> Vec<&'static str> {
        let _gate = self.send_gate.lock().await;
        let (snapshot, changed) = {
            let mut value = self.value.write();
            let mut changed = Vec::new();
            for field in FIELDS {
                let Some(raw) = options.get(field) else {
                    continue;
                };
                if field == ON {
                    let Some(on) = parse_bool(raw) else {
                        debug!("Dropping non-boolean '{}' value {}", field, raw);
                        continue;
                    };
                    if value.on != on {
                        changed.push(field);
                    }
                    value.on = on;
                } else {
                    let Some(number) = parse_number(raw) else {
                        debug!("Dropping non-numeric '{}' value {}", field, raw);
                        continue;
                    };
                    let byte = clamp(number);
                    if let Some(channel) = value.channel_mut(field) {
                        if *channel != byte {
                            changed.push(field);
                        }
                        *channel = byte;
                    }
                }
            }
            self.persist(&value);
            (*value, changed)
        };
        self.broadcast(&snapshot).await;
        changed
    }

    pub async fn power_off(&self) -> Vec<&'static str> {
        self.set_fields(&single(ON, Value::Bool(false))).await
    }

    pub async fn power_on(&self) -> Vec<&'static str> {
        self.set_fields(&single(ON, Value::Bool(true))).await
    }

    pub async fn broadcast(&self, value: &ColorValue) {
        let devices = self.registry.active_list();
        self.dispatcher.send(&devices, value).await;
    }

    fn persist(&self, value: &ColorValue) {
        if let Err(e) = persistence::save(&self.path, value) {
            error!("Failed to persist color to {:?}: {}", self.path, e);
        }
    }
}

fn single(field: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(field.to_string(), value);
    map
}
