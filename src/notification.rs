//! Notification payloads and their JSON rendering.
//!
//! A [`Notification`] carries a free-form JSON payload plus convenience fields
//! that are folded into the reserved `aps` dictionary when the payload is
//! serialised. The gateway rejects payloads larger than
//! [`MAX_PAYLOAD_SIZE`]; the size check happens when a connection accepts the
//! notification, not here.

use serde_json::{Map, Value};

use crate::token::DeviceToken;

/// Largest serialised payload the gateway accepts, in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 256;

/// Key of the dictionary reserved for gateway-interpreted fields.
const APS_KEY: &str = "aps";

/// Alert content shown to the user.
#[derive(Clone, Debug, PartialEq)]
pub enum Alert {
    /// A plain message body.
    Text(String),
    /// A structured alert dictionary (`body`, `action-loc-key`, ...).
    Structured(Map<String, Value>),
}

impl From<&str> for Alert {
    fn from(text: &str) -> Self { Self::Text(text.to_owned()) }
}

impl From<String> for Alert {
    fn from(text: String) -> Self { Self::Text(text) }
}

impl From<Map<String, Value>> for Alert {
    fn from(map: Map<String, Value>) -> Self { Self::Structured(map) }
}

/// A single push notification.
///
/// # Examples
///
/// ```
/// use apnwire::{DeviceToken, Notification};
///
/// let mut note = Notification::new(DeviceToken::new(vec![0xaa; 32]));
/// note.alert = Some("You have mail".into());
/// note.badge = Some(3);
/// let json = note.serialize().expect("payload serialises");
/// assert_eq!(json, br#"{"aps":{"alert":"You have mail","badge":3}}"#);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Notification {
    /// Custom payload. Keys under `aps` survive unless overwritten by the
    /// convenience fields below.
    pub payload: Map<String, Value>,
    /// Merged into `aps.alert`.
    pub alert: Option<Alert>,
    /// Merged into `aps.badge`.
    pub badge: Option<u32>,
    /// Merged into `aps.sound`.
    pub sound: Option<String>,
    /// Unix time after which the gateway may discard the notification.
    /// Zero asks the gateway not to store it at all.
    pub expiry: u32,
    device: Option<DeviceToken>,
    sequence_id: Option<u32>,
}

impl Notification {
    /// Create an empty notification addressed to `device`.
    #[must_use]
    pub fn new(device: DeviceToken) -> Self {
        Self {
            device: Some(device),
            ..Self::default()
        }
    }

    /// Set the target device, returning the notification for chaining.
    #[must_use]
    pub fn with_device(mut self, device: DeviceToken) -> Self {
        self.device = Some(device);
        self
    }

    /// Set the alert, returning the notification for chaining.
    #[must_use]
    pub fn with_alert(mut self, alert: impl Into<Alert>) -> Self {
        self.alert = Some(alert.into());
        self
    }

    /// Set the badge, returning the notification for chaining.
    #[must_use]
    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    /// Set the sound, returning the notification for chaining.
    #[must_use]
    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    /// Set the expiry, returning the notification for chaining.
    #[must_use]
    pub fn with_expiry(mut self, expiry: u32) -> Self {
        self.expiry = expiry;
        self
    }

    /// Insert a custom top-level payload key.
    #[must_use]
    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Target device, if one has been set.
    #[must_use]
    pub fn device(&self) -> Option<&DeviceToken> { self.device.as_ref() }

    /// Replace the target device.
    pub fn set_device(&mut self, device: DeviceToken) { self.device = Some(device); }

    /// Sequence identifier assigned by the connection that last sent this
    /// notification.
    #[must_use]
    pub fn sequence_id(&self) -> Option<u32> { self.sequence_id }

    pub(crate) fn assign_sequence_id(&mut self, id: u32) { self.sequence_id = Some(id); }

    /// Build the JSON object sent to the gateway.
    ///
    /// An `aps` dictionary is always present. A non-object `aps` value in the
    /// custom payload is replaced.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut payload = self.payload.clone();
        let aps = payload
            .entry(APS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !aps.is_object() {
            *aps = Value::Object(Map::new());
        }
        if let Value::Object(aps) = aps {
            if let Some(badge) = self.badge {
                aps.insert("badge".to_owned(), Value::from(badge));
            }
            if let Some(sound) = &self.sound {
                aps.insert("sound".to_owned(), Value::from(sound.as_str()));
            }
            if let Some(alert) = &self.alert {
                let alert = match alert {
                    Alert::Text(text) => Value::from(text.as_str()),
                    Alert::Structured(map) => Value::Object(map.clone()),
                };
                aps.insert("alert".to_owned(), alert);
            }
        }
        Value::Object(payload)
    }

    /// Serialise the payload to UTF-8 JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if a custom value cannot be rendered.
    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_json())
    }
}
