//! Interface to the channel dispatcher, which owns the channel hardware.
//!
//! The sequencing engine never touches channel registers itself. It reads and writes channel
//! state through [`ChannelDispatcher`], addressing channels by their slot index
//! (`0..CH_MAX`).

use crate::{
    error::Result,
    types::{
        CouplingType, CurrentRangeSelectionMode, DisplayValue, DprogState, TriggerMode,
        TriggerOnListStop,
    },
};

/// Protection thresholds, delays and enables of one channel.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProtectionSettings {
    /// OVP enabled.
    pub u_state: bool,
    /// OVP type, `true` for hardware OVP.
    pub u_type: bool,
    /// OCP enabled.
    pub i_state: bool,
    /// OPP enabled.
    pub p_state: bool,
    pub u_level: f32,
    pub u_delay: f32,
    pub i_delay: f32,
    pub p_level: f32,
    pub p_delay: f32,
}

/// Fields which only exist on the simulator build.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SimulatorSettings {
    pub load_enabled: bool,
    pub load: f32,
    pub volt_prog_ext: f32,
}

/// Everything about a channel that a profile snapshots.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ChannelSettings {
    pub output_enabled: bool,
    pub sense_enabled: bool,
    pub rprog_enabled: bool,

    pub u_set: f32,
    pub u_step: f32,
    pub u_limit: f32,
    pub i_set: f32,
    pub i_step: f32,
    pub i_limit: f32,
    pub p_limit: f32,

    pub protection: ProtectionSettings,

    pub display_value1: DisplayValue,
    pub display_value2: DisplayValue,
    pub yt_view_rate: f32,

    pub voltage_trigger_mode: TriggerMode,
    pub current_trigger_mode: TriggerMode,
    pub trigger_output_state: bool,
    pub trigger_on_list_stop: TriggerOnListStop,

    pub current_range_selection_mode: CurrentRangeSelectionMode,
    pub auto_select_current_range: bool,
    pub dprog_state: DprogState,
    pub tracking_enabled: bool,

    pub simulator: SimulatorSettings,
}

/// Hardware ceilings of the module installed in a slot.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ChannelMaxima {
    pub u_max: f32,
    pub i_max: f32,
}

/// Operations consumed from the channel dispatcher.
pub trait ChannelDispatcher {
    /// Number of channel slots in use (`CH_NUM`), never more than `CH_MAX`.
    fn channel_count(&self) -> usize;

    /// A module is present in this slot.
    fn is_installed(&self, channel: usize) -> bool;

    /// The channel is installed and passed its self test.
    fn is_ok(&self, channel: usize) -> bool;

    /// Type tag of the module installed in the slot, `0` when empty.
    fn module_type(&self, channel: usize) -> u16;

    fn module_revision(&self, channel: usize) -> u16;

    fn coupling_type(&self) -> CouplingType;

    fn set_coupling_type(&mut self, coupling: CouplingType) -> Result<()>;

    fn output_enable(&mut self, channel: usize, enable: bool);

    fn set_voltage(&mut self, channel: usize, voltage: f32);

    fn set_current(&mut self, channel: usize, current: f32);

    /// Output enables issued until [`Self::end_output_enable_sequence`] switch together.
    fn begin_output_enable_sequence(&mut self);

    fn end_output_enable_sequence(&mut self);

    fn voltage_limit(&self, channel: usize) -> f32;

    fn current_limit(&self, channel: usize) -> f32;

    fn power_limit(&self, channel: usize) -> f32;

    fn voltage_resolution(&self, channel: usize) -> f32;

    /// Current resolution depends on the active range, hence the value.
    fn current_resolution(&self, channel: usize, value: f32) -> f32;

    fn maxima(&self, channel: usize) -> ChannelMaxima;

    /// A protection has tripped on this channel.
    fn is_tripped(&self, channel: usize) -> bool;

    /// Module supports remote programming.
    fn has_rprog(&self, channel: usize) -> bool;

    fn is_remote_programming_enabled(&self, channel: usize) -> bool;

    /// Drive the "summary trigger armed" operation status bit of a channel.
    fn set_trigger_armed_bit(&mut self, channel: usize, armed: bool);

    fn set_trigger_on_list_stop(&mut self, channel: usize, policy: TriggerOnListStop);

    fn settings(&self, channel: usize) -> ChannelSettings;

    /// Store restored settings into the channel. Hardware is refreshed by [`Self::update`].
    fn apply_settings(&mut self, channel: usize, settings: &ChannelSettings);

    /// Push the channel's current settings to the hardware.
    fn update(&mut self, channel: usize);

    fn voltage_trigger_mode(&self, channel: usize) -> TriggerMode {
        self.settings(channel).voltage_trigger_mode
    }

    fn current_trigger_mode(&self, channel: usize) -> TriggerMode {
        self.settings(channel).current_trigger_mode
    }

    /// Output state to apply when a trigger fires.
    fn trigger_output_state(&self, channel: usize) -> bool {
        self.settings(channel).trigger_output_state
    }

    fn trigger_on_list_stop(&self, channel: usize) -> TriggerOnListStop {
        self.settings(channel).trigger_on_list_stop
    }

    fn is_tracking_enabled(&self, channel: usize) -> bool {
        self.settings(channel).tracking_enabled
    }

    /// Channel `1` is slaved to channel `0` under series/parallel coupling.
    fn is_slaved(&self, channel: usize) -> bool {
        channel == 1 && self.coupling_type().pairs_first_channels()
    }
}
