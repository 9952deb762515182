//! Binary block format of persisted profiles and the device configuration.
//!
//! Every block starts with a 6 byte header:
//!
//! | offset | size | field                                           |
//! |--------|------|-------------------------------------------------|
//! | 0      | 4    | CRC-32C over every byte after this field (LE)   |
//! | 4      | 2    | block version (LE)                              |
//!
//! Multi-byte values are little endian and floats are IEEE-754 `f32`. Boolean and small enum
//! fields are packed into flag words with `modular-bitfield`. A block whose checksum or version
//! does not match is treated as empty.

use crc::{CRC_32_ISCSI, Crc};
use fugit::MillisDurationU32;
use modular_bitfield::prelude::*;

use crate::{
    channel::{ChannelSettings, ProtectionSettings, SimulatorSettings},
    config::{
        CH_MAX, DeviceConfig, NUM_PROFILE_LOCATIONS, PROFILE_NAME_LEN, TEMP_SENSOR_MAX,
        TRIGGER_DELAY_MAX,
    },
    profile::{ChannelProfile, Profile, ProfileFlags, ProfileName},
    types::{
        CouplingType, CurrentRangeSelectionMode, DisplayValue, DprogState, TempProtection,
        TriggerMode, TriggerOnListStop, TriggerSource,
    },
};

pub const PROFILE_VERSION: u16 = 1;
pub const CONFIG_VERSION: u16 = 1;

const CHECKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

pub const HEADER_SIZE: usize = 6;

/// Flags, module type and revision, 17 floats and the list count.
const CHANNEL_BLOCK_SIZE: usize = 4 + 2 + 2 + 17 * 4 + 2;
const TEMP_BLOCK_SIZE: usize = 1 + 1 + 4 + 4;

pub const PROFILE_BLOCK_SIZE: usize = HEADER_SIZE
    + 1
    + PROFILE_NAME_LEN
    + CH_MAX * CHANNEL_BLOCK_SIZE
    + TEMP_SENSOR_MAX * TEMP_BLOCK_SIZE;

pub const CONFIG_BLOCK_SIZE: usize = HEADER_SIZE + 1 + 4 + 1 + 1;

#[bitfield]
#[derive(Clone, Copy)]
struct ProfileFlagBits {
    is_valid: bool,
    power_is_up: bool,
    coupling_type: B3,
    #[skip]
    __: B3,
}

#[bitfield]
#[derive(Clone, Copy)]
struct ChannelFlagBits {
    parameters_are_valid: bool,
    output_enabled: bool,
    sense_enabled: bool,
    rprog_enabled: bool,
    u_state: bool,
    u_type: bool,
    i_state: bool,
    p_state: bool,
    display_value1: B2,
    display_value2: B2,
    u_trigger_mode: B2,
    i_trigger_mode: B2,
    trigger_output_state: bool,
    trigger_on_list_stop: B3,
    current_range_selection_mode: B2,
    auto_select_current_range: bool,
    dprog_state: B2,
    tracking_enabled: bool,
    load_enabled: bool,
    #[skip]
    __: B5,
}

#[bitfield]
#[derive(Clone, Copy)]
struct ConfigFlagBits {
    trigger_continuous_initiation: bool,
    profile_auto_recall_enabled: bool,
    #[skip]
    __: B6,
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, data: &[u8]) {
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
    }

    fn u8(&mut self, value: u8) {
        self.bytes(&[value]);
    }

    fn u16(&mut self, value: u16) {
        self.bytes(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.bytes(&value.to_le_bytes());
    }

    fn f32(&mut self, value: f32) {
        self.bytes(&value.to_le_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }
}

/// Write the version and checksum into the header of `block`.
fn seal(block: &mut [u8], version: u16) {
    block[4..HEADER_SIZE].copy_from_slice(&version.to_le_bytes());
    let checksum = CHECKSUM.checksum(&block[4..]);
    block[0..4].copy_from_slice(&checksum.to_le_bytes());
}

/// Check the header of `block` against its contents and the expected version.
pub fn verify(block: &[u8], version: u16) -> bool {
    if block.len() < HEADER_SIZE {
        return false;
    }
    let stored = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
    let stored_version = u16::from_le_bytes([block[4], block[5]]);
    stored_version == version && stored == CHECKSUM.checksum(&block[4..])
}

pub fn encode_profile(profile: &Profile) -> [u8; PROFILE_BLOCK_SIZE] {
    let mut block = [0u8; PROFILE_BLOCK_SIZE];
    {
        let mut w = Writer::new(&mut block[HEADER_SIZE..]);

        let flags = ProfileFlagBits::new()
            .with_is_valid(profile.flags.is_valid)
            .with_power_is_up(profile.flags.power_is_up)
            .with_coupling_type(profile.flags.coupling_type as u8);
        w.bytes(&flags.into_bytes());

        let mut name = [0u8; PROFILE_NAME_LEN];
        let len = profile.name.len();
        name[..len].copy_from_slice(profile.name.as_bytes());
        w.bytes(&name);

        for channel in profile.channels.iter() {
            encode_channel(&mut w, channel);
        }

        for prot in profile.temp_prot.iter() {
            w.u8(prot.sensor);
            w.u8(prot.state as u8);
            w.f32(prot.level);
            w.f32(prot.delay);
        }
    }
    seal(&mut block, PROFILE_VERSION);
    block
}

fn encode_channel(w: &mut Writer<'_>, channel: &ChannelProfile) {
    let s = &channel.settings;
    let flags = ChannelFlagBits::new()
        .with_parameters_are_valid(channel.parameters_are_valid)
        .with_output_enabled(s.output_enabled)
        .with_sense_enabled(s.sense_enabled)
        .with_rprog_enabled(s.rprog_enabled)
        .with_u_state(s.protection.u_state)
        .with_u_type(s.protection.u_type)
        .with_i_state(s.protection.i_state)
        .with_p_state(s.protection.p_state)
        .with_display_value1(s.display_value1 as u8)
        .with_display_value2(s.display_value2 as u8)
        .with_u_trigger_mode(s.voltage_trigger_mode as u8)
        .with_i_trigger_mode(s.current_trigger_mode as u8)
        .with_trigger_output_state(s.trigger_output_state)
        .with_trigger_on_list_stop(s.trigger_on_list_stop as u8)
        .with_current_range_selection_mode(s.current_range_selection_mode as u8)
        .with_auto_select_current_range(s.auto_select_current_range)
        .with_dprog_state(s.dprog_state as u8)
        .with_tracking_enabled(s.tracking_enabled)
        .with_load_enabled(s.simulator.load_enabled);
    w.bytes(&flags.into_bytes());

    w.u16(channel.module_type);
    w.u16(channel.module_revision);

    w.f32(s.u_set);
    w.f32(s.u_step);
    w.f32(s.u_limit);
    w.f32(s.i_set);
    w.f32(s.i_step);
    w.f32(s.i_limit);
    w.f32(s.p_limit);
    w.f32(s.protection.u_level);
    w.f32(s.protection.u_delay);
    w.f32(s.protection.i_delay);
    w.f32(s.protection.p_level);
    w.f32(s.protection.p_delay);
    w.f32(s.yt_view_rate);
    w.f32(channel.u_trigger_value);
    w.f32(channel.i_trigger_value);
    w.f32(s.simulator.load);
    w.f32(s.simulator.volt_prog_ext);

    w.u16(channel.list_count);
}

/// Decode a profile block, `None` if it is corrupt, from another version or holds values
/// outside their enum ranges.
pub fn decode_profile(block: &[u8]) -> Option<Profile> {
    if block.len() != PROFILE_BLOCK_SIZE || !verify(block, PROFILE_VERSION) {
        return None;
    }

    let mut r = Reader::new(&block[HEADER_SIZE..]);

    let flags = ProfileFlagBits::from_bytes(r.take());
    let flags = ProfileFlags {
        is_valid: flags.is_valid(),
        power_is_up: flags.power_is_up(),
        coupling_type: CouplingType::from_repr(flags.coupling_type())?,
    };

    let raw_name: [u8; PROFILE_NAME_LEN] = r.take();
    let len = raw_name
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(PROFILE_NAME_LEN);
    let name = core::str::from_utf8(&raw_name[..len]).ok()?;
    let name = ProfileName::try_from(name).ok()?;

    let mut channels = [ChannelProfile::default(); CH_MAX];
    for channel in channels.iter_mut() {
        *channel = decode_channel(&mut r)?;
    }

    let mut temp_prot = [TempProtection::default(); TEMP_SENSOR_MAX];
    for prot in temp_prot.iter_mut() {
        prot.sensor = r.u8();
        prot.state = r.u8() != 0;
        prot.level = r.f32();
        prot.delay = r.f32();
    }

    Some(Profile {
        flags,
        name,
        channels,
        temp_prot,
    })
}

fn decode_channel(r: &mut Reader<'_>) -> Option<ChannelProfile> {
    let flags = ChannelFlagBits::from_bytes(r.take());
    let module_type = r.u16();
    let module_revision = r.u16();

    let mut s = ChannelSettings {
        output_enabled: flags.output_enabled(),
        sense_enabled: flags.sense_enabled(),
        rprog_enabled: flags.rprog_enabled(),
        protection: ProtectionSettings {
            u_state: flags.u_state(),
            u_type: flags.u_type(),
            i_state: flags.i_state(),
            p_state: flags.p_state(),
            ..Default::default()
        },
        display_value1: DisplayValue::from_repr(flags.display_value1())?,
        display_value2: DisplayValue::from_repr(flags.display_value2())?,
        voltage_trigger_mode: TriggerMode::from_repr(flags.u_trigger_mode())?,
        current_trigger_mode: TriggerMode::from_repr(flags.i_trigger_mode())?,
        trigger_output_state: flags.trigger_output_state(),
        trigger_on_list_stop: TriggerOnListStop::from_repr(flags.trigger_on_list_stop())?,
        current_range_selection_mode: CurrentRangeSelectionMode::from_repr(
            flags.current_range_selection_mode(),
        )?,
        auto_select_current_range: flags.auto_select_current_range(),
        dprog_state: DprogState::from_repr(flags.dprog_state())?,
        tracking_enabled: flags.tracking_enabled(),
        simulator: SimulatorSettings {
            load_enabled: flags.load_enabled(),
            ..Default::default()
        },
        ..Default::default()
    };

    s.u_set = r.f32();
    s.u_step = r.f32();
    s.u_limit = r.f32();
    s.i_set = r.f32();
    s.i_step = r.f32();
    s.i_limit = r.f32();
    s.p_limit = r.f32();
    s.protection.u_level = r.f32();
    s.protection.u_delay = r.f32();
    s.protection.i_delay = r.f32();
    s.protection.p_level = r.f32();
    s.protection.p_delay = r.f32();
    s.yt_view_rate = r.f32();
    let u_trigger_value = r.f32();
    let i_trigger_value = r.f32();
    s.simulator.load = r.f32();
    s.simulator.volt_prog_ext = r.f32();

    let list_count = r.u16();

    Some(ChannelProfile {
        parameters_are_valid: flags.parameters_are_valid(),
        module_type,
        module_revision,
        settings: s,
        u_trigger_value,
        i_trigger_value,
        list_count,
    })
}

/// Clear the validity flag of a sealed profile block in place, keeping the rest of its bytes.
///
/// Returns `false` if `block` is not a valid profile block to begin with.
pub fn invalidate_profile_block(block: &mut [u8]) -> bool {
    if block.len() != PROFILE_BLOCK_SIZE || !verify(block, PROFILE_VERSION) {
        return false;
    }
    let flags = ProfileFlagBits::from_bytes([block[HEADER_SIZE]]).with_is_valid(false);
    block[HEADER_SIZE] = flags.into_bytes()[0];
    seal(block, PROFILE_VERSION);
    true
}

pub fn encode_config(config: &DeviceConfig) -> [u8; CONFIG_BLOCK_SIZE] {
    let mut block = [0u8; CONFIG_BLOCK_SIZE];
    {
        let mut w = Writer::new(&mut block[HEADER_SIZE..]);
        w.u8(config.trigger_source as u8);
        w.u32(config.trigger_delay.to_millis());
        let flags = ConfigFlagBits::new()
            .with_trigger_continuous_initiation(config.trigger_continuous_initiation)
            .with_profile_auto_recall_enabled(config.profile_auto_recall_enabled);
        w.bytes(&flags.into_bytes());
        w.u8(config.profile_auto_recall_location);
    }
    seal(&mut block, CONFIG_VERSION);
    block
}

pub fn decode_config(block: &[u8]) -> Option<DeviceConfig> {
    if block.len() != CONFIG_BLOCK_SIZE || !verify(block, CONFIG_VERSION) {
        return None;
    }

    let mut r = Reader::new(&block[HEADER_SIZE..]);
    let trigger_source = TriggerSource::from_repr(r.u8())?;
    let delay_ms = r.u32();
    if delay_ms > TRIGGER_DELAY_MAX.to_millis() {
        return None;
    }
    let flags = ConfigFlagBits::from_bytes(r.take());
    let location = r.u8();
    if location as usize >= NUM_PROFILE_LOCATIONS {
        return None;
    }

    Some(DeviceConfig {
        trigger_source,
        trigger_delay: MillisDurationU32::millis(delay_ms),
        trigger_continuous_initiation: flags.trigger_continuous_initiation(),
        profile_auto_recall_enabled: flags.profile_auto_recall_enabled(),
        profile_auto_recall_location: location,
    })
}
