//! Exposure adjustment state

use serde::{Deserialize, Serialize};

/// Brightness and contrast step range
pub const LEVEL_MIN: i8 = -2;
pub const LEVEL_MAX: i8 = 2;
/// Highest night mode level (0 = off)
pub const NIGHT_MODE_MAX: u8 = 3;

/// Sensor-side exposure adjustments.
///
/// Every mutation clamps to the valid range; moving past a bound is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureState {
    brightness: i8,
    contrast: i8,
    night_mode: u8,
}

impl ExposureState {
    /// Build a state from arbitrary levels, clamping each one
    pub fn new(brightness: i8, contrast: i8, night_mode: u8) -> Self {
        Self {
            brightness: brightness.clamp(LEVEL_MIN, LEVEL_MAX),
            contrast: contrast.clamp(LEVEL_MIN, LEVEL_MAX),
            night_mode: night_mode.min(NIGHT_MODE_MAX),
        }
    }

    pub fn brightness(&self) -> i8 {
        self.brightness
    }

    pub fn contrast(&self) -> i8 {
        self.contrast
    }

    pub fn night_mode(&self) -> u8 {
        self.night_mode
    }

    /// Returns true if the value moved
    pub fn increase_brightness(&mut self) -> bool {
        step(&mut self.brightness, 1)
    }

    pub fn decrease_brightness(&mut self) -> bool {
        step(&mut self.brightness, -1)
    }

    pub fn increase_contrast(&mut self) -> bool {
        step(&mut self.contrast, 1)
    }

    pub fn decrease_contrast(&mut self) -> bool {
        step(&mut self.contrast, -1)
    }

    /// Set the night mode level, clamped to `NIGHT_MODE_MAX`
    pub fn set_night_mode(&mut self, level: u8) -> bool {
        let level = level.min(NIGHT_MODE_MAX);
        let changed = level != self.night_mode;
        self.night_mode = level;
        changed
    }
}

fn step(level: &mut i8, delta: i8) -> bool {
    let next = level.saturating_add(delta).clamp(LEVEL_MIN, LEVEL_MAX);
    let changed = next != *level;
    *level = next;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_is_neutral() {
        let state = ExposureState::default();
        assert_eq!(state.brightness(), 0);
        assert_eq!(state.contrast(), 0);
        assert_eq!(state.night_mode(), 0);
    }

    #[test]
    fn test_brightness_pins_at_bounds() {
        let mut state = ExposureState::default();
        assert!(state.increase_brightness());
        assert!(state.increase_brightness());
        assert!(!state.increase_brightness());
        assert_eq!(state.brightness(), LEVEL_MAX);

        for _ in 0..10 {
            state.decrease_brightness();
        }
        assert_eq!(state.brightness(), LEVEL_MIN);
        assert!(!state.decrease_brightness());
    }

    #[test]
    fn test_night_mode_clamps() {
        let mut state = ExposureState::default();
        assert!(state.set_night_mode(200));
        assert_eq!(state.night_mode(), NIGHT_MODE_MAX);
        assert!(!state.set_night_mode(NIGHT_MODE_MAX));
        assert!(state.set_night_mode(0));
    }

    #[test]
    fn test_new_clamps() {
        let state = ExposureState::new(-100, 100, 9);
        assert_eq!(state, ExposureState::new(LEVEL_MIN, LEVEL_MAX, NIGHT_MODE_MAX));
    }

    #[derive(Debug, Clone)]
    enum Adjust {
        BrightnessUp,
        BrightnessDown,
        ContrastUp,
        ContrastDown,
        NightMode(u8),
    }

    fn adjust() -> impl Strategy<Value = Adjust> {
        prop_oneof![
            Just(Adjust::BrightnessUp),
            Just(Adjust::BrightnessDown),
            Just(Adjust::ContrastUp),
            Just(Adjust::ContrastDown),
            any::<u8>().prop_map(Adjust::NightMode),
        ]
    }

    proptest! {
        #[test]
        fn prop_levels_stay_in_range(ops in proptest::collection::vec(adjust(), 0..64)) {
            let mut state = ExposureState::default();
            for op in ops {
                match op {
                    Adjust::BrightnessUp => { state.increase_brightness(); }
                    Adjust::BrightnessDown => { state.decrease_brightness(); }
                    Adjust::ContrastUp => { state.increase_contrast(); }
                    Adjust::ContrastDown => { state.decrease_contrast(); }
                    Adjust::NightMode(level) => { state.set_night_mode(level); }
                }
                prop_assert!((LEVEL_MIN..=LEVEL_MAX).contains(&state.brightness()));
                prop_assert!((LEVEL_MIN..=LEVEL_MAX).contains(&state.contrast()));
                prop_assert!(state.night_mode() <= NIGHT_MODE_MAX);
            }
        }

        #[test]
        fn prop_past_bound_stays_pinned(extra in 0usize..32) {
            let mut state = ExposureState::default();
            for _ in 0..(LEVEL_MAX as usize + extra) {
                state.increase_contrast();
            }
            prop_assert_eq!(state.contrast(), LEVEL_MAX);
            prop_assert!(!state.increase_contrast());
            prop_assert_eq!(state.contrast(), LEVEL_MAX);
        }
    }
}
