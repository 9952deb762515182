//! Fakes of the storage medium and of the firmware collaborators, for unit tests.

use core::cell::Cell;

use embedded_io::SeekFrom;
use fugit::MillisDurationU32;
use thiserror::Error;

use crate::{
    channel::{ChannelDispatcher, ChannelMaxima, ChannelSettings},
    config::{CH_MAX, NUM_PROFILE_LOCATIONS, TEMP_SENSOR_MAX},
    dispatch::Services,
    error::{Result, ScpiError},
    instrument::Instrument,
    list::{ListExecutor, ListFilePath},
    queue::{Pause, QueueMessage},
    record::{CONFIG_BLOCK_SIZE, PROFILE_BLOCK_SIZE},
    system::{DateTime, Event, Instant, System},
    trigger::TriggerLevels,
    types::{CouplingType, DisplayValue, TempProtection, TriggerOnListStop, TriggerSource},
};

/// Emulates an external EEPROM, erased to `0xFF`.
pub struct MockEeprom {
    data: Vec<u8>,
    position: usize,
    /// Number of successful writes
    writes: usize,
    /// Flag to simulate write errors
    should_error_on_write: bool,
    /// Flag to simulate read errors
    should_error_on_read: bool,
}

#[derive(Error, Debug)]
pub enum MockEepromError {
    #[error("access past the end of the medium")]
    OutOfBounds,
    #[error("simulated error")]
    SimulatedError,
}

impl embedded_io::Error for MockEepromError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockEepromError::OutOfBounds => embedded_io::ErrorKind::OutOfMemory,
            MockEepromError::SimulatedError => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockEeprom {
    type Error = MockEepromError;
}

impl embedded_io::Read for MockEeprom {
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockEepromError::SimulatedError);
        }
        let available = self.data.len().saturating_sub(self.position);
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

impl embedded_io::Write for MockEeprom {
    fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockEepromError::SimulatedError);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let available = self.data.len().saturating_sub(self.position);
        if available == 0 {
            return Err(MockEepromError::OutOfBounds);
        }
        let n = buf.len().min(available);
        self.data[self.position..self.position + n].copy_from_slice(&buf[..n]);
        self.position += n;
        self.writes += 1;
        Ok(n)
    }

    fn flush(&mut self) -> core::result::Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockEepromError::SimulatedError);
        }
        Ok(())
    }
}

impl embedded_io::Seek for MockEeprom {
    fn seek(&mut self, pos: SeekFrom) -> core::result::Result<u64, Self::Error> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.data.len() as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 || target as usize > self.data.len() {
            return Err(MockEepromError::OutOfBounds);
        }
        self.position = target as usize;
        Ok(target as u64)
    }
}

impl MockEeprom {
    /// Large enough for the configuration block and every profile location.
    pub fn new() -> Self {
        Self {
            data: vec![0xFF; CONFIG_BLOCK_SIZE + NUM_PROFILE_LOCATIONS * PROFILE_BLOCK_SIZE],
            position: 0,
            writes: 0,
            should_error_on_write: false,
            should_error_on_read: false,
        }
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }
}

impl Default for MockEeprom {
    fn default() -> Self {
        Self::new()
    }
}

/// One channel slot with a 40 V / 5 A module.
#[derive(Debug, Clone)]
pub struct MockChannel {
    pub installed: bool,
    pub ok: bool,
    pub module_type: u16,
    pub module_revision: u16,
    pub settings: ChannelSettings,
    pub voltage_limit: f32,
    pub current_limit: f32,
    pub power_limit: f32,
    pub maxima: ChannelMaxima,
    pub tripped: bool,
    pub rprog: bool,
    pub remote_programming: bool,
    pub armed: bool,
    pub updates: usize,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self {
            installed: true,
            ok: true,
            module_type: 405,
            module_revision: 0x0102,
            settings: ChannelSettings {
                u_step: 0.01,
                u_limit: 40.0,
                i_step: 0.01,
                i_limit: 5.0,
                p_limit: 200.0,
                display_value1: DisplayValue::Voltage,
                display_value2: DisplayValue::Current,
                yt_view_rate: 0.1,
                ..Default::default()
            },
            voltage_limit: 40.0,
            current_limit: 5.0,
            power_limit: 200.0,
            maxima: ChannelMaxima {
                u_max: 40.0,
                i_max: 5.0,
            },
            tripped: false,
            rprog: false,
            remote_programming: false,
            armed: false,
            updates: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockChannels {
    pub channels: [MockChannel; CH_MAX],
    pub coupling: CouplingType,
    pub output_sequences: usize,
}

impl ChannelDispatcher for MockChannels {
    fn channel_count(&self) -> usize {
        CH_MAX
    }

    fn is_installed(&self, channel: usize) -> bool {
        self.channels[channel].installed
    }

    fn is_ok(&self, channel: usize) -> bool {
        self.channels[channel].installed && self.channels[channel].ok
    }

    fn module_type(&self, channel: usize) -> u16 {
        self.channels[channel].module_type
    }

    fn module_revision(&self, channel: usize) -> u16 {
        self.channels[channel].module_revision
    }

    fn coupling_type(&self) -> CouplingType {
        self.coupling
    }

    fn set_coupling_type(&mut self, coupling: CouplingType) -> Result<()> {
        self.coupling = coupling;
        Ok(())
    }

    fn output_enable(&mut self, channel: usize, enable: bool) {
        self.channels[channel].settings.output_enabled = enable;
    }

    fn set_voltage(&mut self, channel: usize, voltage: f32) {
        self.channels[channel].settings.u_set = voltage;
    }

    fn set_current(&mut self, channel: usize, current: f32) {
        self.channels[channel].settings.i_set = current;
    }

    fn begin_output_enable_sequence(&mut self) {}

    fn end_output_enable_sequence(&mut self) {
        self.output_sequences += 1;
    }

    fn voltage_limit(&self, channel: usize) -> f32 {
        self.channels[channel].voltage_limit
    }

    fn current_limit(&self, channel: usize) -> f32 {
        self.channels[channel].current_limit
    }

    fn power_limit(&self, channel: usize) -> f32 {
        self.channels[channel].power_limit
    }

    fn voltage_resolution(&self, _channel: usize) -> f32 {
        0.01
    }

    fn current_resolution(&self, _channel: usize, _value: f32) -> f32 {
        0.001
    }

    fn maxima(&self, channel: usize) -> ChannelMaxima {
        self.channels[channel].maxima
    }

    fn is_tripped(&self, channel: usize) -> bool {
        self.channels[channel].tripped
    }

    fn has_rprog(&self, channel: usize) -> bool {
        self.channels[channel].rprog
    }

    fn is_remote_programming_enabled(&self, channel: usize) -> bool {
        self.channels[channel].remote_programming
    }

    fn set_trigger_armed_bit(&mut self, channel: usize, armed: bool) {
        self.channels[channel].armed = armed;
    }

    fn set_trigger_on_list_stop(&mut self, channel: usize, policy: TriggerOnListStop) {
        self.channels[channel].settings.trigger_on_list_stop = policy;
    }

    fn settings(&self, channel: usize) -> ChannelSettings {
        self.channels[channel].settings
    }

    fn apply_settings(&mut self, channel: usize, settings: &ChannelSettings) {
        self.channels[channel].settings = *settings;
    }

    fn update(&mut self, channel: usize) {
        self.channels[channel].updates += 1;
    }
}

#[derive(Debug)]
pub struct MockLists {
    /// List length per channel, `0` is an empty list.
    pub lengths: [usize; CH_MAX],
    pub lengths_equivalent: bool,
    pub limit_error: Option<ScpiError>,
    pub active: bool,
    pub counts: [u16; CH_MAX],
    pub changed: [bool; CH_MAX],
    pub started: Vec<usize>,
    pub list_values: Vec<(usize, usize)>,
    pub aborts: usize,
    pub loaded: Vec<ListFilePath>,
    pub saved: Vec<ListFilePath>,
}

impl Default for MockLists {
    fn default() -> Self {
        Self {
            lengths: [0; CH_MAX],
            lengths_equivalent: true,
            limit_error: None,
            active: false,
            counts: [0; CH_MAX],
            changed: [false; CH_MAX],
            started: Vec::new(),
            list_values: Vec::new(),
            aborts: 0,
            loaded: Vec::new(),
            saved: Vec::new(),
        }
    }
}

impl ListExecutor for MockLists {
    fn is_list_empty(&self, channel: usize) -> bool {
        self.lengths[channel] == 0
    }

    fn are_list_lengths_equivalent(&self, _channel: usize) -> bool {
        self.lengths_equivalent
    }

    fn check_limits(&self, _channel: usize) -> Result<()> {
        self.limit_error.map_or(Ok(()), Err)
    }

    fn execution_start(&mut self, channel: usize) {
        self.started.push(channel);
    }

    fn set_list_value(&mut self, channel: usize, index: usize) -> Result<()> {
        self.list_values.push((channel, index));
        Ok(())
    }

    fn max_list_size(&self, channel: usize) -> usize {
        self.lengths[channel]
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn abort(&mut self) {
        self.aborts += 1;
    }

    fn list_count(&self, channel: usize) -> u16 {
        self.counts[channel]
    }

    fn set_list_count(&mut self, channel: usize, count: u16) {
        self.counts[channel] = count;
    }

    fn lists_changed(&self, channel: usize) -> bool {
        self.changed[channel]
    }

    fn set_lists_changed(&mut self, channel: usize, changed: bool) {
        self.changed[channel] = changed;
    }

    fn load_list(&mut self, _channel: usize, path: &str) -> Result<()> {
        self.loaded.push(ListFilePath::try_from(path).unwrap());
        Ok(())
    }

    fn save_list(&mut self, _channel: usize, path: &str) -> Result<()> {
        self.saved.push(ListFilePath::try_from(path).unwrap());
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockSystem {
    pub now: Instant,
    pub date_time: DateTime,
    pub errors: Vec<ScpiError>,
    pub events: Vec<Event>,
    pub power_is_up: bool,
    pub power_up_fails: bool,
    pub temp_sensors: usize,
    pub temp_prot: [TempProtection; TEMP_SENSOR_MAX],
    pub calibration: bool,
    pub idle: bool,
    pub io_pin_pulses: usize,
    pub trigger_input_pin: Option<u8>,
    pub dlog_source: Option<TriggerSource>,
    pub dlog_triggers: usize,
    pub mounted: Result<()>,
    pub files: Vec<ListFilePath>,
}

impl Default for MockSystem {
    fn default() -> Self {
        Self {
            now: Instant::from_ticks(5_000_000),
            date_time: DateTime {
                year: 2026,
                month: 10,
                day: 18,
                hour: 12,
                minute: 0,
                second: 0,
            },
            errors: Vec::new(),
            events: Vec::new(),
            power_is_up: true,
            power_up_fails: false,
            temp_sensors: 2,
            temp_prot: core::array::from_fn(|i| TempProtection {
                sensor: i as u8,
                state: true,
                level: 60.0 + i as f32,
                delay: 5.0,
            }),
            calibration: false,
            idle: true,
            io_pin_pulses: 0,
            trigger_input_pin: None,
            dlog_source: None,
            dlog_triggers: 0,
            mounted: Ok(()),
            files: Vec::new(),
        }
    }
}

impl MockSystem {
    pub fn add_file(&mut self, path: &str) {
        self.files.push(ListFilePath::try_from(path).unwrap());
    }
}

impl System for MockSystem {
    fn now(&self) -> Instant {
        self.now
    }

    fn date_time(&self) -> DateTime {
        self.date_time
    }

    fn push_error(&mut self, error: ScpiError) {
        self.errors.push(error);
    }

    fn push_event(&mut self, event: Event) {
        self.events.push(event);
    }

    fn is_power_up(&self) -> bool {
        self.power_is_up
    }

    fn power_up(&mut self) -> bool {
        if self.power_up_fails {
            return false;
        }
        self.power_is_up = true;
        true
    }

    fn power_down(&mut self) {
        self.power_is_up = false;
    }

    fn temp_sensor_count(&self) -> usize {
        self.temp_sensors
    }

    fn temperature_protection(&self, sensor: usize) -> TempProtection {
        self.temp_prot[sensor]
    }

    fn set_temperature_protection(&mut self, sensor: usize, protection: &TempProtection) {
        self.temp_prot[sensor] = *protection;
    }

    fn is_calibration_enabled(&self) -> bool {
        self.calibration
    }

    fn is_idle(&self) -> bool {
        self.idle
    }

    fn on_trigger(&mut self) {
        self.io_pin_pulses += 1;
    }

    fn set_pin_as_trigger_input(&mut self, pin: u8) {
        self.trigger_input_pin = Some(pin);
    }

    fn dlog_accepts_trigger(&self, source: TriggerSource) -> bool {
        self.dlog_source == Some(source)
    }

    fn dlog_trigger_generated(&mut self) {
        self.dlog_triggers += 1;
    }

    fn mass_storage_mounted(&self) -> Result<()> {
        self.mounted
    }

    fn file_exists(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.as_str() == path)
    }

    fn delete_file(&mut self, path: &str) -> Result<()> {
        self.files.retain(|f| f.as_str() != path);
        Ok(())
    }
}

/// Records what the dispatcher hands to the rest of the firmware.
#[derive(Debug, Default)]
pub struct MockServices {
    pub forwarded: Vec<QueueMessage>,
    pub event_queue_ticks: usize,
    pub sound_ticks: usize,
    pub ntp_ticks: usize,
    pub ontime_ticks: usize,
    pub storage_ticks: usize,
}

impl Services for MockServices {
    fn on_queue_message(&mut self, message: QueueMessage) {
        self.forwarded.push(message);
    }

    fn event_queue_tick(&mut self) {
        self.event_queue_ticks += 1;
    }

    fn sound_tick(&mut self) {
        self.sound_ticks += 1;
    }

    fn ntp_tick(&mut self) {
        self.ntp_ticks += 1;
    }

    fn ontime_tick(&mut self, _now: Instant) {
        self.ontime_ticks += 1;
    }

    fn storage_tick(&mut self) {
        self.storage_ticks += 1;
    }
}

/// Returns straight away, recording how long it was asked to wait.
#[derive(Debug, Default)]
pub struct MockPause {
    pub pauses: Cell<usize>,
    pub last: Cell<Option<MillisDurationU32>>,
}

impl Pause for MockPause {
    fn pause(&self, max: MillisDurationU32) {
        self.pauses.set(self.pauses.get() + 1);
        self.last.set(Some(max));
    }
}

pub type MockInstrument<'a> = Instrument<'a, MockChannels, MockLists, MockEeprom, MockSystem>;

/// An instrument with six healthy channels, a blank EEPROM and a mounted SD card.
pub fn mock_instrument(levels: &TriggerLevels) -> MockInstrument<'_> {
    Instrument::new(
        MockChannels::default(),
        MockLists::default(),
        MockEeprom::new(),
        MockSystem::default(),
        levels,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, Seek, Write};

    #[test]
    fn new_eeprom_is_erased() {
        let mut eeprom = MockEeprom::new();
        let mut buf = [0u8; 8];
        assert_eq!(eeprom.read(&mut buf).unwrap(), 8);
        assert_eq!(buf, [0xFF; 8]);
    }

    #[test]
    fn write_then_read_at_offset() {
        let mut eeprom = MockEeprom::new();
        eeprom.seek(SeekFrom::Start(100)).unwrap();
        eeprom.write(b"profile").unwrap();

        let mut buf = [0u8; 7];
        eeprom.seek(SeekFrom::Current(-7)).unwrap();
        eeprom.read(&mut buf).unwrap();
        assert_eq!(&buf, b"profile");
    }

    #[test]
    fn read_stops_at_end() {
        let mut eeprom = MockEeprom::new();
        eeprom.seek(SeekFrom::End(-2)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(eeprom.read(&mut buf).unwrap(), 2);
        assert_eq!(eeprom.read(&mut buf).unwrap(), 0);
        assert!(matches!(
            eeprom.write(b"x"),
            Err(MockEepromError::OutOfBounds)
        ));
    }

    #[test]
    fn simulated_errors() {
        let mut eeprom = MockEeprom::new();
        eeprom.set_write_error(true);
        eeprom.set_read_error(true);
        assert!(eeprom.write(b"x").is_err());
        assert!(eeprom.flush().is_err());
        assert!(eeprom.read(&mut [0u8; 1]).is_err());
    }

    #[test]
    fn seek_before_start_is_rejected() {
        let mut eeprom = MockEeprom::new();
        assert!(eeprom.seek(SeekFrom::Current(-1)).is_err());
    }
}
