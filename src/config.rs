//! Instrument dimensions and the persisted device-level configuration.

use fugit::MillisDurationU32;

use crate::types::TriggerSource;

/// Number of channel slots the firmware knows about.
pub const CH_MAX: usize = 6;

/// Location `0` is the live shadow profile, the rest are manual slots.
pub const NUM_PROFILE_LOCATIONS: usize = 10;

/// AUX sensor plus one sensor per channel.
pub const TEMP_SENSOR_MAX: usize = CH_MAX + 1;

/// Index of the AUX temperature sensor.
pub const TEMP_SENSOR_AUX: u8 = 0;

/// Capacity of a profile name in bytes.
pub const PROFILE_NAME_LEN: usize = 32;

/// Depth of the dispatcher queue.
pub const QUEUE_SIZE: usize = 10;

/// How long the dispatcher waits for a message before running a tick pass.
pub const POLL_TIMEOUT: MillisDurationU32 = MillisDurationU32::millis(25);

pub const TRIGGER_DELAY_MIN: MillisDurationU32 = MillisDurationU32::millis(0);
pub const TRIGGER_DELAY_MAX: MillisDurationU32 = MillisDurationU32::millis(3_600_000);
pub const TRIGGER_DELAY_DEFAULT: MillisDurationU32 = MillisDurationU32::millis(0);

pub const OTP_AUX_DEFAULT_STATE: bool = true;
pub const OTP_AUX_DEFAULT_LEVEL: f32 = 50.0;
pub const OTP_AUX_DEFAULT_DELAY: f32 = 10.0;
pub const OTP_CH_DEFAULT_STATE: bool = true;
pub const OTP_CH_DEFAULT_LEVEL: f32 = 75.0;
pub const OTP_CH_DEFAULT_DELAY: f32 = 10.0;

/// Used when a recalled channel has no YT view rate.
pub const GUI_YT_VIEW_RATE_DEFAULT: f32 = 0.1;

/// Device-level settings kept in their own block on the storage medium.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceConfig {
    pub trigger_source: TriggerSource,
    pub trigger_delay: MillisDurationU32,
    pub trigger_continuous_initiation: bool,
    pub profile_auto_recall_enabled: bool,
    pub profile_auto_recall_location: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            trigger_source: TriggerSource::default(),
            trigger_delay: TRIGGER_DELAY_DEFAULT,
            trigger_continuous_initiation: false,
            profile_auto_recall_enabled: true,
            profile_auto_recall_location: 0,
        }
    }
}

impl DeviceConfig {
    /// Put the trigger related fields back to their defaults.
    pub fn reset_trigger(&mut self) {
        self.trigger_source = TriggerSource::default();
        self.trigger_delay = TRIGGER_DELAY_DEFAULT;
        self.trigger_continuous_initiation = false;
    }
}
