//! Enumerations shared by the trigger engine, profile records and the collaborator traits.
//!
//! Every enum has a stable `u8` representation which is what ends up in profile blocks and
//! queue words. Use `from_repr` to decode it.

use strum_macros::{EnumIter, FromRepr};

/// How a quantity (voltage or current) of a channel reacts to a trigger.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum TriggerMode {
    /// Output stays where it is.
    #[default]
    Fixed = 0x00,
    /// Run the channel's list program.
    List = 0x01,
    /// Jump to the pending trigger level.
    Step = 0x02,
}

/// Event class which may advance the trigger state machine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum TriggerSource {
    /// `*TRG` over any bus.
    Bus = 0x00,
    /// No trigger needed, initiation starts the sequence straight away.
    #[default]
    Immediate = 0x01,
    /// Front panel.
    Manual = 0x02,
    /// Rear panel digital input 1.
    Pin1 = 0x03,
    /// Rear panel digital input 2.
    Pin2 = 0x04,
}

impl TriggerSource {
    /// Digital pin index used as trigger input by this source, if any.
    pub fn input_pin(&self) -> Option<u8> {
        match self {
            TriggerSource::Pin1 => Some(0),
            TriggerSource::Pin2 => Some(1),
            _ => None,
        }
    }
}

/// Channel coupling topology.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum CouplingType {
    #[default]
    None = 0x00,
    Parallel = 0x01,
    Series = 0x02,
    CommonGnd = 0x03,
    SplitRails = 0x04,
}

impl CouplingType {
    /// Series and parallel drive channels 1 and 2 as one logical output.
    pub fn pairs_first_channels(&self) -> bool {
        matches!(self, CouplingType::Series | CouplingType::Parallel)
    }
}

/// What a channel does once its list program stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum TriggerOnListStop {
    #[default]
    OutputOff = 0x00,
    SetToFirstStep = 0x01,
    SetToLastStep = 0x02,
    Standby = 0x03,
}

/// Measured value shown in one of the two channel display slots.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum DisplayValue {
    #[default]
    Voltage = 0x00,
    Current = 0x01,
    Power = 0x02,
}

/// Down-programmer state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum DprogState {
    #[default]
    Off = 0x00,
    On = 0x01,
    Auto = 0x02,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum CurrentRangeSelectionMode {
    #[default]
    UseBoth = 0x00,
    AlwaysHigh = 0x01,
    AlwaysLow = 0x02,
}

/// Over-temperature protection configuration of one sensor.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TempProtection {
    /// Sensor index. `0` is the AUX sensor, `1..` follow the channels.
    pub sensor: u8,
    pub state: bool,
    /// Trip level in degrees Celsius.
    pub level: f32,
    /// Trip delay in seconds.
    pub delay: f32,
}
