//! Mirrored device state.

use serde::{Deserialize, Serialize};

/// Snapshot of a bulb as reported by `getPilot` and sent by `setPilot`.
///
/// Optional fields that are unset are omitted from the wire form. A scene and
/// a manual color/temperature are never set at the same time once the
/// snapshot has gone through a [`StateMirror`](crate::StateMirror) mutation.
///
/// ```
/// use wiz_sync::Pilot;
///
/// let pilot: Pilot = serde_json::from_str(
///     r#"{"mac":"a8bb50aa0000","rssi":-60,"state":true,"sceneId":0,"r":255,"g":0,"b":0,"dimming":80}"#,
/// ).unwrap();
/// assert!(pilot.state.on);
/// assert_eq!(pilot.state.scene_id, None);
/// assert_eq!(pilot.state.r, Some(255));
/// assert_eq!(pilot.info.rssi, Some(-60));
///
/// let pushed = serde_json::to_value(&pilot.state).unwrap();
/// assert!(pushed.get("mac").is_none());
/// ```
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(rename = "state", default)]
    pub on: bool,
    #[serde(
        rename = "sceneId",
        default,
        deserialize_with = "scene_from_wire"
    )]
    pub scene_id: Option<u16>,
    #[serde(default)]
    pub r: Option<u8>,
    #[serde(default)]
    pub g: Option<u8>,
    #[serde(default)]
    pub b: Option<u8>,
    #[serde(default)]
    pub dimming: Option<u8>,
    /// Color temperature in Kelvin.
    #[serde(default)]
    pub temp: Option<u16>,
    /// White channel level, independent of `temp`.
    #[serde(rename = "w", default)]
    pub white: Option<u8>,
}

/// A `getPilot` result: the pushable state plus read-only device details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Pilot {
    #[serde(flatten)]
    pub state: DeviceState,
    #[serde(flatten)]
    pub info: DeviceInfo,
}

/// Details a device reports about itself that are never pushed back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub rssi: Option<i32>,
    /// Origin of the last state change as reported by the firmware (e.g. `"udp"`).
    #[serde(default)]
    pub src: Option<String>,
}

/// Devices report `sceneId: 0` when no scene is active.
fn scene_from_wire<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let scene = Option::<u16>::deserialize(deserializer)?;
    Ok(scene.filter(|id| *id != 0))
}

impl DeviceState {
    /// The color as an `(r, g, b)` triple when all three channels are set.
    pub fn rgb(&self) -> Option<(u8, u8, u8)> {
        match (self.r, self.g, self.b) {
            (Some(r), Some(g), Some(b)) => Some((r, g, b)),
            _ => None,
        }
    }
}
