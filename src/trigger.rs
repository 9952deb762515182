//! Trigger state machine.
//!
//! ```text
//! Idle -> Initiated -> Triggered -> Executing -> Initiated (continuous) | Idle
//! ```
//!
//! [`Instrument::trigger_abort`] forces `Idle` from any state. While `Initiated` the "summary
//! trigger armed" status bit of every channel is set.

use core::sync::atomic::{AtomicU32, Ordering};

use embedded_io::{Read, Seek, Write};
use fugit::MillisDurationU32;

use crate::{
    channel::ChannelDispatcher,
    config::{CH_MAX, TRIGGER_DELAY_MAX, TRIGGER_DELAY_MIN},
    error::{Result, ScpiError},
    instrument::Instrument,
    list::ListExecutor,
    system::{Instant, System},
    types::{TriggerMode, TriggerOnListStop, TriggerSource},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    #[default]
    Idle,
    /// Armed, waiting for a trigger from the configured source.
    Initiated,
    /// Trigger received, waiting for the delay to elapse.
    Triggered,
    Executing,
}

/// Pending trigger levels per channel.
///
/// Setters only stage a value which the dispatcher reads when the sequence starts, so they are
/// safe to call from any execution context, e.g. through a `static`. Staged values are rounded
/// to the channel resolution when they are read back through the [`Instrument`].
pub struct TriggerLevels {
    voltage: [AtomicU32; CH_MAX],
    current: [AtomicU32; CH_MAX],
}

impl TriggerLevels {
    pub const fn new() -> Self {
        Self {
            voltage: [const { AtomicU32::new(0) }; CH_MAX],
            current: [const { AtomicU32::new(0) }; CH_MAX],
        }
    }

    pub fn voltage(&self, channel: usize) -> f32 {
        self.voltage
            .get(channel)
            .map_or(0.0, |v| f32::from_bits(v.load(Ordering::Relaxed)))
    }

    pub fn current(&self, channel: usize) -> f32 {
        self.current
            .get(channel)
            .map_or(0.0, |i| f32::from_bits(i.load(Ordering::Relaxed)))
    }

    /// Stage `value` as is.
    pub fn set_voltage(&self, channel: usize, value: f32) -> Result<()> {
        let slot = self.voltage.get(channel).ok_or(ScpiError::DataOutOfRange)?;
        slot.store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Stage `value` as is.
    pub fn set_current(&self, channel: usize, value: f32) -> Result<()> {
        let slot = self.current.get(channel).ok_or(ScpiError::DataOutOfRange)?;
        slot.store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}

impl Default for TriggerLevels {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatcher-owned part of the trigger subsystem.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TriggerStatus {
    pub(crate) state: TriggerState,
    /// Only meaningful while executing.
    pub(crate) in_progress: [bool; CH_MAX],
    pub(crate) triggered_at: Instant,
}

impl Default for TriggerStatus {
    fn default() -> Self {
        Self {
            state: TriggerState::Idle,
            in_progress: [false; CH_MAX],
            triggered_at: Instant::from_ticks(0),
        }
    }
}

fn round_half_away(value: f32) -> f32 {
    if value >= 0.0 {
        (value + 0.5) as i64 as f32
    } else {
        (value - 0.5) as i64 as f32
    }
}

/// Round `value` to a multiple of `resolution`.
pub(crate) fn round_prec(value: f32, resolution: f32) -> f32 {
    if resolution <= 0.0 {
        return value;
    }
    // Dividing by a whole number of steps per unit keeps decimal resolutions exact.
    let per_unit = round_half_away(1.0 / resolution);
    if per_unit >= 1.0 {
        round_half_away(value * per_unit) / per_unit
    } else {
        round_half_away(value / resolution) * resolution
    }
}

impl<C, L, S, Y> Instrument<'_, C, L, S, Y>
where
    C: ChannelDispatcher,
    L: ListExecutor,
    S: Read + Write + Seek,
    Y: System,
{
    pub fn trigger_state(&self) -> TriggerState {
        self.trigger.state
    }

    pub fn is_trigger_idle(&self) -> bool {
        self.trigger.state == TriggerState::Idle
    }

    pub fn is_trigger_initiated(&self) -> bool {
        self.trigger.state == TriggerState::Initiated
    }

    pub fn is_triggered(&self) -> bool {
        self.trigger.state == TriggerState::Triggered
    }

    pub fn is_trigger_in_progress(&self, channel: usize) -> bool {
        self.trigger.in_progress.get(channel).copied().unwrap_or(false)
    }

    pub fn is_continuous_initiation_enabled(&self) -> bool {
        self.config.trigger_continuous_initiation
    }

    fn set_trigger_state(&mut self, state: TriggerState) {
        let previous = self.trigger.state;
        if previous == state {
            return;
        }
        log::debug!("trigger state {:?} -> {:?}", previous, state);

        if state == TriggerState::Initiated || previous == TriggerState::Initiated {
            let armed = state == TriggerState::Initiated;
            for ch in 0..self.channels.channel_count() {
                self.channels.set_trigger_armed_bit(ch, armed);
            }
        }
        self.trigger.state = state;
    }

    pub fn trigger_source(&self) -> TriggerSource {
        self.config.trigger_source
    }

    pub fn set_trigger_source(&mut self, source: TriggerSource) -> Result<()> {
        self.config.trigger_source = source;
        if let Some(pin) = source.input_pin() {
            self.system.set_pin_as_trigger_input(pin);
        }
        self.persist_config()
    }

    pub fn trigger_delay(&self) -> MillisDurationU32 {
        self.config.trigger_delay
    }

    pub fn set_trigger_delay(&mut self, delay: MillisDurationU32) -> Result<()> {
        if delay < TRIGGER_DELAY_MIN || delay > TRIGGER_DELAY_MAX {
            return Err(ScpiError::DataOutOfRange);
        }
        self.config.trigger_delay = delay;
        self.persist_config()
    }

    fn check_channel_index(&self, channel: usize) -> Result<()> {
        if channel < self.channels.channel_count() {
            Ok(())
        } else {
            Err(ScpiError::DataOutOfRange)
        }
    }

    /// Stage the voltage applied to `channel` when a STEP sequence fires, rounded to the
    /// channel's voltage resolution. The value is only validated when the sequence starts.
    pub fn set_trigger_voltage(&self, channel: usize, value: f32) -> Result<()> {
        self.check_channel_index(channel)?;
        let value = round_prec(value, self.channels.voltage_resolution(channel));
        self.levels.set_voltage(channel, value)
    }

    /// Current counterpart of [`Self::set_trigger_voltage`].
    pub fn set_trigger_current(&self, channel: usize, value: f32) -> Result<()> {
        self.check_channel_index(channel)?;
        let value = round_prec(value, self.channels.current_resolution(channel, value));
        self.levels.set_current(channel, value)
    }

    /// Pending voltage of `channel`, rounded to the channel's voltage resolution.
    pub fn trigger_voltage(&self, channel: usize) -> f32 {
        if self.check_channel_index(channel).is_err() {
            return 0.0;
        }
        round_prec(
            self.levels.voltage(channel),
            self.channels.voltage_resolution(channel),
        )
    }

    pub fn trigger_current(&self, channel: usize) -> f32 {
        if self.check_channel_index(channel).is_err() {
            return 0.0;
        }
        let value = self.levels.current(channel);
        round_prec(value, self.channels.current_resolution(channel, value))
    }

    /// Change what `channel` does when its list stops. Only allowed while idle.
    pub fn set_trigger_on_list_stop(
        &mut self,
        channel: usize,
        policy: TriggerOnListStop,
    ) -> Result<()> {
        self.check_channel_index(channel)?;
        if !self.is_trigger_idle() {
            return Err(ScpiError::CannotChangeTransientTrigger);
        }
        self.channels.set_trigger_on_list_stop(channel, policy);
        self.save(false);
        Ok(())
    }

    /// Channels which act for their coupling/tracking group, in index order.
    ///
    /// Skips channels which are not ok, the slaved channel of a series/parallel pair and every
    /// tracking channel after the first one.
    fn group_leaders(&self) -> heapless::Vec<usize, CH_MAX> {
        let mut leaders = heapless::Vec::new();
        let mut tracking_seen = false;
        for ch in 0..self.channels.channel_count().min(CH_MAX) {
            if !self.channels.is_ok(ch) || self.channels.is_slaved(ch) {
                continue;
            }
            if self.channels.is_tracking_enabled(ch) {
                if tracking_seen {
                    continue;
                }
                tracking_seen = true;
            }
            // Bounded by CH_MAX.
            let _ = leaders.push(ch);
        }
        leaders
    }

    /// Check that a sequence could start now.
    pub fn check_trigger(&self) -> Result<()> {
        let mut only_fixed = true;

        for ch in self.group_leaders() {
            let mode = self.channels.voltage_trigger_mode(ch);
            if mode != self.channels.current_trigger_mode(ch) {
                return Err(ScpiError::IncompatibleTransientModes);
            }
            if mode == TriggerMode::Fixed {
                continue;
            }

            if self.channels.is_remote_programming_enabled(ch) {
                return Err(ScpiError::ExecutionError);
            }

            if mode == TriggerMode::List {
                if self.lists.is_list_empty(ch) {
                    return Err(ScpiError::ListIsEmpty);
                }
                if !self.lists.are_list_lengths_equivalent(ch) {
                    return Err(ScpiError::ListLengthsNotEquivalent);
                }
                self.lists.check_limits(ch)?;
            } else {
                let u = self.trigger_voltage(ch);
                let i = self.trigger_current(ch);
                if u > self.channels.voltage_limit(ch) {
                    return Err(ScpiError::VoltageLimitExceeded);
                }
                if i > self.channels.current_limit(ch) {
                    return Err(ScpiError::CurrentLimitExceeded);
                }
                if u * i > self.channels.power_limit(ch) {
                    return Err(ScpiError::PowerLimitExceeded);
                }
            }

            only_fixed = false;
        }

        if only_fixed {
            return Err(ScpiError::CannotInitiateWhileInFixedMode);
        }
        Ok(())
    }

    /// Deliver a trigger from `source`.
    ///
    /// Fires the sequence if it is initiated and waiting for `source`, and/or hands the trigger
    /// to data logging if that is waiting for it. With `check_immediately` a zero delay
    /// sequence may start before this returns.
    pub fn generate_trigger(&mut self, source: TriggerSource, check_immediately: bool) -> Result<()> {
        let sequence = self.config.trigger_source == source && self.is_trigger_initiated();
        let dlog = self.system.dlog_accepts_trigger(source);

        if !sequence && !dlog {
            return Err(ScpiError::TriggerIgnored);
        }

        if dlog {
            self.system.dlog_trigger_generated();
        }

        if sequence {
            self.set_trigger_state(TriggerState::Triggered);
            let now = self.system.now();
            self.trigger.triggered_at = now;
            if check_immediately {
                self.check_trigger_delay(now);
            }
        }
        Ok(())
    }

    /// Start the sequence once the configured delay has been exceeded. Does nothing unless
    /// triggered.
    ///
    /// A start failing validation here has no caller to report to: the error goes to the event
    /// queue and the state machine returns to idle.
    pub fn check_trigger_delay(&mut self, now: Instant) {
        if self.trigger.state != TriggerState::Triggered {
            return;
        }
        let elapsed_ms = now
            .checked_duration_since(self.trigger.triggered_at)
            .map_or(0, |d| d.to_millis());
        if elapsed_ms <= self.config.trigger_delay.to_millis() as u64 {
            return;
        }
        if let Err(e) = self.start_immediately() {
            self.generate_error(e);
            self.set_trigger_state(TriggerState::Idle);
        }
    }

    /// Run the sequence now, without waiting for a trigger.
    pub fn start_immediately(&mut self) -> Result<()> {
        self.check_trigger()?;

        self.set_trigger_state(TriggerState::Executing);
        for ch in 0..self.channels.channel_count().min(CH_MAX) {
            if self.channels.is_ok(ch) {
                self.trigger.in_progress[ch] = true;
            }
        }

        self.system.on_trigger();

        self.channels.begin_output_enable_sequence();
        for ch in self.group_leaders() {
            match self.channels.voltage_trigger_mode(ch) {
                TriggerMode::List => {
                    self.lists.execution_start(ch);
                    let output = self.channels.trigger_output_state(ch);
                    self.channels.output_enable(ch, output);
                }
                mode => {
                    if mode == TriggerMode::Step {
                        let (u, i) = (self.trigger_voltage(ch), self.trigger_current(ch));
                        self.channels.set_voltage(ch, u);
                        self.channels.set_current(ch, i);
                        let output = self.channels.trigger_output_state(ch);
                        self.channels.output_enable(ch, output);
                    }
                    self.set_trigger_finished(ch);
                }
            }
        }
        self.channels.end_output_enable_sequence();

        Ok(())
    }

    /// Mark the sequence of `channel`, and of every channel grouped with it, as done.
    ///
    /// Called for STEP/FIXED channels right after they are set, and by the list executor when
    /// a list stops. Ignored unless a sequence is executing.
    pub fn set_trigger_finished(&mut self, channel: usize) {
        if self.trigger.state != TriggerState::Executing || channel >= CH_MAX {
            log::debug!("channel {} finished outside a sequence", channel);
            return;
        }

        if channel < 2 && self.channels.coupling_type().pairs_first_channels() {
            self.trigger.in_progress[0] = false;
            self.trigger.in_progress[1] = false;
        } else if self.channels.is_tracking_enabled(channel) {
            for ch in 0..self.channels.channel_count().min(CH_MAX) {
                if self.channels.is_tracking_enabled(ch) {
                    self.trigger.in_progress[ch] = false;
                }
            }
        } else {
            self.trigger.in_progress[channel] = false;
        }

        if self.channels.voltage_trigger_mode(channel) == TriggerMode::List {
            self.apply_list_stop_policy(channel);
        }

        if self.trigger.in_progress.iter().all(|p| !p) {
            if self.config.trigger_continuous_initiation {
                self.set_trigger_state(TriggerState::Initiated);
            } else {
                self.set_trigger_state(TriggerState::Idle);
            }
        }
    }

    fn apply_list_stop_policy(&mut self, channel: usize) {
        match self.channels.trigger_on_list_stop(channel) {
            TriggerOnListStop::OutputOff => {
                self.channels.set_voltage(channel, 0.0);
                self.channels.set_current(channel, 0.0);
                self.channels.output_enable(channel, false);
            }
            TriggerOnListStop::SetToFirstStep => {
                if let Err(e) = self.lists.set_list_value(channel, 0) {
                    self.generate_error(e);
                }
            }
            TriggerOnListStop::SetToLastStep => {
                let last = self.lists.max_list_size(channel).saturating_sub(1);
                if let Err(e) = self.lists.set_list_value(channel, last) {
                    self.generate_error(e);
                }
            }
            TriggerOnListStop::Standby => {
                self.channels.set_voltage(channel, 0.0);
                self.channels.set_current(channel, 0.0);
                self.channels.output_enable(channel, false);
                self.system.power_down();
            }
        }
    }

    /// Arm the trigger, or run the sequence straight away when the source is immediate.
    pub fn initiate(&mut self) -> Result<()> {
        if self.config.trigger_source == TriggerSource::Immediate {
            return self.start_immediately();
        }
        self.check_trigger()?;
        self.set_trigger_state(TriggerState::Initiated);
        Ok(())
    }

    /// Persist the continuous initiation flag. Enabling it also initiates.
    pub fn enable_initiate_continuous(&mut self, enable: bool) -> Result<()> {
        self.config.trigger_continuous_initiation = enable;
        self.persist_config()?;
        if enable { self.initiate() } else { Ok(()) }
    }

    /// Stop any running list and return to idle.
    pub fn trigger_abort(&mut self) {
        self.lists.abort();
        self.set_trigger_state(TriggerState::Idle);
    }

    /// Restore the default trigger configuration and return to idle.
    pub fn trigger_reset(&mut self) -> Result<()> {
        self.config.reset_trigger();
        self.set_trigger_state(TriggerState::Idle);
        self.persist_config()
    }

    pub(crate) fn trigger_init(&mut self) {
        self.set_trigger_state(TriggerState::Idle);
        if self.config.trigger_continuous_initiation {
            if let Err(e) = self.initiate() {
                self.generate_error(e);
            }
        }
    }

    /// Periodic work of the trigger subsystem, driven by the dispatcher.
    pub fn trigger_tick(&mut self, now: Instant) {
        self.check_trigger_delay(now);
    }
}
