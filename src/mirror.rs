//! Validated in-memory mirror of a device's state.
//!
//! Every mutator checks its field's legal range before touching the snapshot.
//! An out-of-range write is refused with a [`Rejection`] and leaves the mirror
//! exactly as it was; values are never saturated at a boundary.

use std::fmt;
use std::ops::RangeInclusive;

use strum_macros::{Display, EnumIter, EnumString};

use crate::config::Config;
use crate::state::DeviceState;

/// A mutable field of [`DeviceState`], named by its wire key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum Field {
    #[strum(serialize = "state")]
    Power,
    #[strum(serialize = "sceneId")]
    Scene,
    #[strum(serialize = "r")]
    Red,
    #[strum(serialize = "g")]
    Green,
    #[strum(serialize = "b")]
    Blue,
    #[strum(serialize = "dimming")]
    Dimming,
    #[strum(serialize = "temp")]
    Temp,
    #[strum(serialize = "w")]
    White,
    /// r, g and b written together with [`FieldValue::Rgb`].
    #[strum(serialize = "color")]
    Color,
}

impl Field {
    /// Legal values of a numeric field. `None` for power and the composite color.
    ///
    /// ```
    /// use wiz_sync::Field;
    ///
    /// assert_eq!(Field::Red.range(), Some(0..=255));
    /// assert_eq!(Field::Scene.range(), Some(1..=32));
    /// assert_eq!(Field::Power.range(), None);
    /// assert_eq!(Field::Color.range(), None);
    /// ```
    pub fn range(self) -> Option<RangeInclusive<i64>> {
        match self {
            Field::Power | Field::Color => None,
            Field::Scene => Some(1..=32),
            Field::Red | Field::Green | Field::Blue => Some(0..=255),
            Field::Dimming | Field::White => Some(0..=100),
            Field::Temp => Some(1000..=10000),
        }
    }
}

/// A value written with [`Change::Set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Rgb(u8, u8, u8),
}

impl FieldValue {
    fn as_bool(self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    fn as_int(self) -> Option<i64> {
        match self {
            FieldValue::Int(n) => Some(n),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

macro_rules! int_field_value {
    ($($t:ty),*) => {
        $(impl From<$t> for FieldValue {
            fn from(value: $t) -> Self {
                FieldValue::Int(i64::from(value))
            }
        })*
    };
}

int_field_value!(u8, u16, u32, i8, i16, i32, i64);

impl From<(u8, u8, u8)> for FieldValue {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        FieldValue::Rgb(r, g, b)
    }
}

/// What to do to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Set(FieldValue),
    Increase,
    Decrease,
    /// Flip the power flag. Only valid for [`Field::Power`].
    Toggle,
}

impl Change {
    pub fn set(value: impl Into<FieldValue>) -> Self {
        Change::Set(value.into())
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Set(FieldValue::Bool(b)) => write!(f, "set {b}"),
            Change::Set(FieldValue::Int(n)) => write!(f, "set {n}"),
            Change::Set(FieldValue::Rgb(r, g, b)) => write!(f, "set ({r}, {g}, {b})"),
            Change::Increase => write!(f, "increase"),
            Change::Decrease => write!(f, "decrease"),
            Change::Toggle => write!(f, "toggle"),
        }
    }
}

/// Why a mutation left the mirror unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    OutOfRange { value: i64, min: i64, max: i64 },
    WrongType,
    Unsupported(Change),
}

/// A refused mutation. The mirror is untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct Rejection {
    pub field: Field,
    pub reason: RejectReason,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::OutOfRange { value, min, max } => {
                write!(f, "{value} is outside {min}..={max}")
            }
            RejectReason::WrongType => write!(f, "value has the wrong type"),
            RejectReason::Unsupported(change) => write!(f, "{change} is not supported"),
        }
    }
}

impl Rejection {
    fn new(field: Field, reason: RejectReason) -> Self {
        Rejection { field, reason }
    }
}

/// Increase/decrease step per field family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Steps {
    pub byte: u16,
    pub percent: u16,
    pub kelvin: u16,
    pub scene: u16,
}

impl Steps {
    fn for_field(self, field: Field) -> i64 {
        let step = match field {
            Field::Red | Field::Green | Field::Blue | Field::Color => self.byte,
            Field::Dimming | Field::White => self.percent,
            Field::Temp => self.kelvin,
            Field::Scene | Field::Power => self.scene,
        };
        i64::from(step)
    }
}

impl Default for Steps {
    fn default() -> Self {
        Steps::from(&Config::default())
    }
}

impl From<&Config> for Steps {
    fn from(config: &Config) -> Self {
        Steps {
            byte: config.byte_step,
            percent: config.percent_step,
            kelvin: config.kelvin_step,
            scene: config.scene_step,
        }
    }
}

type Result<T> = std::result::Result<T, Rejection>;

/// The local copy of one device's state.
///
/// ```
/// use wiz_sync::{DeviceState, StateMirror};
///
/// let mut mirror = StateMirror::from_snapshot(DeviceState::default());
/// mirror.set_red(200).unwrap();
/// mirror.set_scene(4).unwrap();
/// assert_eq!(mirror.state().scene_id, Some(4));
/// assert_eq!(mirror.state().r, None);
/// assert!(mirror.set_dimming(120).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateMirror {
    state: DeviceState,
}

impl StateMirror {
    pub fn from_snapshot(state: DeviceState) -> Self {
        StateMirror { state }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn into_state(self) -> DeviceState {
        self.state
    }

    /// Replace the whole snapshot without validation. The device is authoritative.
    pub fn set_from_snapshot(&mut self, state: DeviceState) {
        self.state = state;
    }

    /// Drop the active scene.
    pub fn clear_preset(&mut self) {
        self.state.scene_id = None;
    }

    /// Drop the manual color and temperature.
    pub fn clear_manual_color(&mut self) {
        self.state.r = None;
        self.state.g = None;
        self.state.b = None;
        self.state.temp = None;
    }

    pub fn set_power(&mut self, on: bool) {
        self.state.on = on;
    }

    pub fn toggle_power(&mut self) {
        self.state.on = !self.state.on;
    }

    /// Activate a scene. Clears the manual color and temperature.
    pub fn set_scene(&mut self, id: i64) -> Result<()> {
        let id = checked(Field::Scene, id)?;
        self.clear_manual_color();
        self.state.scene_id = Some(id);
        Ok(())
    }

    /// Set the red channel. Clears the active scene.
    pub fn set_red(&mut self, value: i64) -> Result<()> {
        self.state.r = Some(self.manual(Field::Red, value)?);
        Ok(())
    }

    /// Set the green channel. Clears the active scene.
    pub fn set_green(&mut self, value: i64) -> Result<()> {
        self.state.g = Some(self.manual(Field::Green, value)?);
        Ok(())
    }

    /// Set the blue channel. Clears the active scene.
    pub fn set_blue(&mut self, value: i64) -> Result<()> {
        self.state.b = Some(self.manual(Field::Blue, value)?);
        Ok(())
    }

    /// Set all three color channels at once. Clears the active scene.
    pub fn set_rgb(&mut self, r: u8, g: u8, b: u8) {
        self.clear_preset();
        self.state.r = Some(r);
        self.state.g = Some(g);
        self.state.b = Some(b);
    }

    /// Set the color temperature in Kelvin. Clears the active scene.
    pub fn set_temp(&mut self, kelvin: i64) -> Result<()> {
        self.state.temp = Some(self.manual(Field::Temp, kelvin)?);
        Ok(())
    }

    pub fn set_dimming(&mut self, value: i64) -> Result<()> {
        self.state.dimming = Some(checked(Field::Dimming, value)?);
        Ok(())
    }

    pub fn set_white(&mut self, value: i64) -> Result<()> {
        self.state.white = Some(checked(Field::White, value)?);
        Ok(())
    }

    /// Current value of a numeric field, `None` when unset.
    pub fn numeric(&self, field: Field) -> Option<i64> {
        let s = &self.state;
        match field {
            Field::Power | Field::Color => None,
            Field::Scene => s.scene_id.map(i64::from),
            Field::Red => s.r.map(i64::from),
            Field::Green => s.g.map(i64::from),
            Field::Blue => s.b.map(i64::from),
            Field::Dimming => s.dimming.map(i64::from),
            Field::Temp => s.temp.map(i64::from),
            Field::White => s.white.map(i64::from),
        }
    }

    /// Apply `change` to `field`.
    ///
    /// Increase and decrease move by the field's step. An unset field lands on
    /// its minimum when increased and on its maximum when decreased.
    /// [`Field::Color`] only takes [`FieldValue::Rgb`] writes.
    pub fn apply(&mut self, field: Field, change: Change, steps: Steps) -> Result<()> {
        match (field, change) {
            (Field::Power, Change::Set(value)) => {
                let on = value
                    .as_bool()
                    .ok_or_else(|| Rejection::new(field, RejectReason::WrongType))?;
                self.set_power(on);
                Ok(())
            }
            (Field::Power, Change::Toggle) => {
                self.toggle_power();
                Ok(())
            }
            (Field::Color, Change::Set(FieldValue::Rgb(r, g, b))) => {
                self.set_rgb(r, g, b);
                Ok(())
            }
            (Field::Color, Change::Set(_)) => {
                Err(Rejection::new(field, RejectReason::WrongType))
            }
            (Field::Power, _) | (Field::Color, _) | (_, Change::Toggle) => {
                Err(Rejection::new(field, RejectReason::Unsupported(change)))
            }
            (_, Change::Set(value)) => {
                let value = value
                    .as_int()
                    .ok_or_else(|| Rejection::new(field, RejectReason::WrongType))?;
                self.set_numeric(field, value)
            }
            (_, Change::Increase) => {
                let target = match self.numeric(field) {
                    Some(current) => current + steps.for_field(field),
                    None => bounds(field).0,
                };
                self.set_numeric(field, target)
            }
            (_, Change::Decrease) => {
                let target = match self.numeric(field) {
                    Some(current) => current - steps.for_field(field),
                    None => bounds(field).1,
                };
                self.set_numeric(field, target)
            }
        }
    }

    fn set_numeric(&mut self, field: Field, value: i64) -> Result<()> {
        match field {
            Field::Scene => self.set_scene(value),
            Field::Red => self.set_red(value),
            Field::Green => self.set_green(value),
            Field::Blue => self.set_blue(value),
            Field::Dimming => self.set_dimming(value),
            Field::Temp => self.set_temp(value),
            Field::White => self.set_white(value),
            Field::Power | Field::Color => Err(Rejection::new(field, RejectReason::WrongType)),
        }
    }

    /// Validate a manual color/temperature write and clear the scene it replaces.
    fn manual<T: TryFrom<i64>>(&mut self, field: Field, value: i64) -> Result<T> {
        let value = checked(field, value)?;
        self.clear_preset();
        Ok(value)
    }
}

fn bounds(field: Field) -> (i64, i64) {
    field
        .range()
        .map_or((0, 0), |range| (*range.start(), *range.end()))
}

fn checked<T: TryFrom<i64>>(field: Field, value: i64) -> Result<T> {
    let (min, max) = bounds(field);
    let out_of_range = || Rejection::new(field, RejectReason::OutOfRange { value, min, max });
    if !(min..=max).contains(&value) {
        return Err(out_of_range());
    }
    T::try_from(value).map_err(|_| out_of_range())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn synced() -> StateMirror {
        StateMirror::from_snapshot(DeviceState {
            on: true,
            scene_id: None,
            r: Some(240),
            g: Some(10),
            b: Some(0),
            dimming: Some(50),
            temp: None,
            white: Some(0),
        })
    }

    fn numeric_fields() -> impl Iterator<Item = Field> {
        Field::iter().filter(|f| f.range().is_some())
    }

    #[test]
    fn test_set_in_range_is_exact() {
        for field in numeric_fields() {
            let range = field.range().unwrap();
            for value in [*range.start(), *range.end()] {
                let mut mirror = synced();
                mirror.apply(field, Change::set(value), Steps::default()).unwrap();
                assert_eq!(mirror.numeric(field), Some(value), "{field}");
            }
        }
    }

    #[test]
    fn test_set_out_of_range_leaves_mirror_unchanged() {
        for field in numeric_fields() {
            let range = field.range().unwrap();
            for value in [*range.start() - 1, *range.end() + 1, i64::MIN] {
                let mut mirror = synced();
                let before = mirror.clone();
                let err = mirror.apply(field, Change::set(value), Steps::default()).unwrap_err();
                assert_eq!(err.field, field);
                assert!(matches!(err.reason, RejectReason::OutOfRange { .. }));
                assert_eq!(mirror, before, "{field} {value}");
            }
        }
    }

    #[test]
    fn test_repeated_steps_stay_in_range() {
        for field in numeric_fields() {
            let range = field.range().unwrap();
            let mut mirror = synced();
            for _ in 0..1000 {
                let _ = mirror.apply(field, Change::Increase, Steps::default());
                assert!(range.contains(&mirror.numeric(field).unwrap()));
            }
            for _ in 0..1000 {
                let _ = mirror.apply(field, Change::Decrease, Steps::default());
                assert!(range.contains(&mirror.numeric(field).unwrap()));
            }
        }
    }

    #[test]
    fn test_increase_past_max_is_rejected_not_saturated() {
        let mut mirror = synced();
        let err = mirror.apply(Field::Red, Change::Increase, Steps::default()).unwrap_err();
        assert_eq!(
            err.reason,
            RejectReason::OutOfRange { value: 257, min: 0, max: 255 }
        );
        assert_eq!(mirror.state().r, Some(240));

        mirror.apply(Field::Dimming, Change::set(100), Steps::default()).unwrap();
        assert!(mirror.apply(Field::Dimming, Change::Increase, Steps::default()).is_err());
        assert_eq!(mirror.state().dimming, Some(100));
    }

    #[test]
    fn test_unset_field_steps_onto_its_bound() {
        let mut mirror = StateMirror::default();
        mirror.apply(Field::Scene, Change::Increase, Steps::default()).unwrap();
        assert_eq!(mirror.state().scene_id, Some(1));
        mirror.apply(Field::Green, Change::Increase, Steps::default()).unwrap();
        assert_eq!(mirror.state().g, Some(0));
        mirror.apply(Field::Temp, Change::Increase, Steps::default()).unwrap();
        assert_eq!(mirror.state().temp, Some(1000));
        mirror.apply(Field::Dimming, Change::Decrease, Steps::default()).unwrap();
        assert_eq!(mirror.state().dimming, Some(100));

        mirror.apply(Field::Green, Change::Increase, Steps::default()).unwrap();
        assert_eq!(mirror.state().g, Some(17));
    }

    #[test]
    fn test_color_sets_all_channels_and_clears_scene() {
        let mut mirror = synced();
        mirror.set_scene(7).unwrap();
        mirror
            .apply(Field::Color, Change::set((12u8, 34u8, 56u8)), Steps::default())
            .unwrap();
        let state = mirror.state();
        assert_eq!(state.rgb(), Some((12, 34, 56)));
        assert_eq!(state.scene_id, None);
        assert_eq!(state.dimming, Some(50));
    }

    #[test]
    fn test_color_only_takes_rgb_writes() {
        let mut mirror = synced();
        let before = mirror.clone();
        for change in [Change::Increase, Change::Decrease, Change::Toggle] {
            assert_eq!(
                mirror.apply(Field::Color, change, Steps::default()).unwrap_err().reason,
                RejectReason::Unsupported(change)
            );
        }
        assert_eq!(
            mirror.apply(Field::Color, Change::set(200), Steps::default()).unwrap_err().reason,
            RejectReason::WrongType
        );
        assert_eq!(
            mirror.apply(Field::Red, Change::set((1u8, 2u8, 3u8)), Steps::default()).unwrap_err().reason,
            RejectReason::WrongType
        );
        assert_eq!(mirror, before);
    }

    #[test]
    fn test_scene_clears_color_and_temp() {
        let mut mirror = synced();
        mirror.set_temp(2700).unwrap();
        mirror.set_scene(12).unwrap();
        let state = mirror.state();
        assert_eq!(state.scene_id, Some(12));
        assert_eq!((state.r, state.g, state.b, state.temp), (None, None, None, None));
        assert_eq!(state.dimming, Some(50));
        assert_eq!(state.white, Some(0));
    }

    #[test]
    fn test_color_clears_scene() {
        for field in [Field::Red, Field::Green, Field::Blue, Field::Temp] {
            let mut mirror = synced();
            mirror.set_scene(3).unwrap();
            let value = *field.range().unwrap().start();
            mirror.apply(field, Change::set(value), Steps::default()).unwrap();
            assert_eq!(mirror.state().scene_id, None, "{field}");
        }
    }

    #[test]
    fn test_rejected_color_keeps_scene() {
        let mut mirror = synced();
        mirror.set_scene(3).unwrap();
        assert!(mirror.set_red(300).is_err());
        assert_eq!(mirror.state().scene_id, Some(3));
    }

    #[test]
    fn test_white_and_dimming_do_not_touch_scene() {
        let mut mirror = synced();
        mirror.set_scene(5).unwrap();
        mirror.set_white(40).unwrap();
        mirror.set_dimming(30).unwrap();
        assert_eq!(mirror.state().scene_id, Some(5));
    }

    #[test]
    fn test_power_changes() {
        let mut mirror = synced();
        mirror.apply(Field::Power, Change::Toggle, Steps::default()).unwrap();
        assert!(!mirror.state().on);
        mirror.apply(Field::Power, Change::set(true), Steps::default()).unwrap();
        assert!(mirror.state().on);
    }

    #[test]
    fn test_type_and_kind_mismatches_are_rejected() {
        let mut mirror = synced();
        let before = mirror.clone();
        assert_eq!(
            mirror.apply(Field::Power, Change::set(1), Steps::default()).unwrap_err().reason,
            RejectReason::WrongType
        );
        assert_eq!(
            mirror.apply(Field::Dimming, Change::set(true), Steps::default()).unwrap_err().reason,
            RejectReason::WrongType
        );
        assert_eq!(
            mirror.apply(Field::Power, Change::Increase, Steps::default()).unwrap_err().reason,
            RejectReason::Unsupported(Change::Increase)
        );
        assert_eq!(
            mirror.apply(Field::Red, Change::Toggle, Steps::default()).unwrap_err().reason,
            RejectReason::Unsupported(Change::Toggle)
        );
        assert_eq!(mirror, before);
    }

    #[test]
    fn test_set_from_snapshot_bypasses_validation() {
        let mut mirror = synced();
        let raw = DeviceState {
            scene_id: Some(1000),
            r: Some(1),
            ..DeviceState::default()
        };
        mirror.set_from_snapshot(raw.clone());
        assert_eq!(mirror.state(), &raw);
    }

    #[test]
    fn test_field_names_match_wire_keys() {
        assert_eq!("dimming".parse::<Field>().unwrap(), Field::Dimming);
        assert_eq!("sceneId".parse::<Field>().unwrap(), Field::Scene);
        assert_eq!(Field::White.to_string(), "w");
        assert_eq!("color".parse::<Field>().unwrap(), Field::Color);
    }
}
