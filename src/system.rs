//! Instrument-wide services the sequencing engine relies on: time, the event queue, power,
//! temperature protection and file handling on the mass storage medium.

use core::fmt;

use crate::{
    error::{Result, ScpiError},
    types::{TempProtection, TriggerSource},
};

/// Microsecond timestamps from the free running system timer.
pub type Instant = fugit::TimerInstantU64<1_000_000>;

/// Span between two [`Instant`]s.
pub type Duration = fugit::TimerDurationU64<1_000_000>;

/// Wall clock time from the RTC.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Entries pushed onto the instrument event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A profile was recalled from the given location.
    RecalledFromProfile(u8),
    /// A profile was recalled from an exported file.
    RecalledFromFile,
}

/// Services consumed from the rest of the firmware.
pub trait System {
    fn now(&self) -> Instant;

    fn date_time(&self) -> DateTime;

    /// Push an error onto every protocol error queue and the event log.
    fn push_error(&mut self, error: ScpiError);

    fn push_event(&mut self, event: Event);

    fn is_power_up(&self) -> bool;

    /// Returns `false` if the instrument failed to power up.
    fn power_up(&mut self) -> bool;

    fn power_down(&mut self);

    /// Number of temperature sensors actually fitted.
    fn temp_sensor_count(&self) -> usize;

    fn temperature_protection(&self, sensor: usize) -> TempProtection;

    fn set_temperature_protection(&mut self, sensor: usize, protection: &TempProtection);

    fn is_calibration_enabled(&self) -> bool;

    /// No user interaction or remote command is in flight.
    fn is_idle(&self) -> bool;

    /// Trigger output pulse on the digital I/O pins.
    fn on_trigger(&mut self);

    /// Configure digital pin `pin` as a trigger input.
    fn set_pin_as_trigger_input(&mut self, _pin: u8) {}

    /// Data logging is initiated and waits for `source`.
    fn dlog_accepts_trigger(&self, _source: TriggerSource) -> bool {
        false
    }

    fn dlog_trigger_generated(&mut self) {}

    /// `Ok` when a filesystem is mounted.
    fn mass_storage_mounted(&self) -> Result<()>;

    fn file_exists(&self, path: &str) -> bool;

    fn delete_file(&mut self, path: &str) -> Result<()>;
}
