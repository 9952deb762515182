//! Profile persistence.
//!
//! A profile is a snapshot of the whole instrument configuration. Location `0` shadows the live
//! state and is written behind the scenes (see [`Instrument::save`] and
//! [`Instrument::profile_tick`]); locations `1..NUM_PROFILE_LOCATIONS` are named slots managed by
//! the user. Each location may also own one list program file per channel.

use core::fmt::Write as _;

use embedded_io::{Read, Seek, Write};

use crate::{
    channel::{ChannelDispatcher, ChannelSettings},
    config::{
        CH_MAX, GUI_YT_VIEW_RATE_DEFAULT, NUM_PROFILE_LOCATIONS, OTP_AUX_DEFAULT_DELAY,
        OTP_AUX_DEFAULT_LEVEL, OTP_AUX_DEFAULT_STATE, OTP_CH_DEFAULT_DELAY, OTP_CH_DEFAULT_LEVEL,
        OTP_CH_DEFAULT_STATE, PROFILE_NAME_LEN, TEMP_SENSOR_AUX, TEMP_SENSOR_MAX,
    },
    error::{Result, ScpiError},
    instrument::{Instrument, storage_error},
    list::{ListExecutor, profile_list_path},
    record::{PROFILE_BLOCK_SIZE, decode_profile, encode_profile},
    store::read_full,
    system::{Event, System},
    types::{CouplingType, DisplayValue, DprogState, TempProtection},
};

/// Names starting with this were generated on save and get regenerated on the next save.
pub const AUTO_NAME_PREFIX: &str = "Saved at ";

pub type ProfileName = heapless::String<PROFILE_NAME_LEN>;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProfileFlags {
    pub is_valid: bool,
    pub power_is_up: bool,
    pub coupling_type: CouplingType,
}

/// Persisted state of one channel slot.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ChannelProfile {
    /// A module was installed when the snapshot was taken.
    pub parameters_are_valid: bool,
    pub module_type: u16,
    pub module_revision: u16,
    pub settings: ChannelSettings,
    pub u_trigger_value: f32,
    pub i_trigger_value: f32,
    pub list_count: u16,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Profile {
    pub flags: ProfileFlags,
    pub name: ProfileName,
    pub channels: [ChannelProfile; CH_MAX],
    pub temp_prot: [TempProtection; TEMP_SENSOR_MAX],
}

/// Gates of the deferred save of location `0`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SaveState {
    pub(crate) enabled: bool,
    /// Live state diverged from location `0`.
    pub(crate) dirty: bool,
    pub(crate) freeze: bool,
}

impl Default for SaveState {
    fn default() -> Self {
        Self {
            enabled: true,
            dirty: false,
            freeze: false,
        }
    }
}

/// Copy as much of `name` as fits, never splitting a character.
pub fn truncated_name(name: &str) -> ProfileName {
    let mut out = ProfileName::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

fn default_temp_protection(sensor: usize) -> TempProtection {
    if sensor == TEMP_SENSOR_AUX as usize {
        TempProtection {
            sensor: sensor as u8,
            state: OTP_AUX_DEFAULT_STATE,
            level: OTP_AUX_DEFAULT_LEVEL,
            delay: OTP_AUX_DEFAULT_DELAY,
        }
    } else {
        TempProtection {
            sensor: sensor as u8,
            state: OTP_CH_DEFAULT_STATE,
            level: OTP_CH_DEFAULT_LEVEL,
            delay: OTP_CH_DEFAULT_DELAY,
        }
    }
}

impl<C, L, S, Y> Instrument<'_, C, L, S, Y>
where
    C: ChannelDispatcher,
    L: ListExecutor,
    S: Read + Write + Seek,
    Y: System,
{
    fn channel_slots(&self) -> usize {
        self.channels.channel_count().min(CH_MAX)
    }

    /// Snapshot the live configuration. The name is left empty.
    pub fn fill_profile(&self) -> Profile {
        let mut profile = Profile::default();
        profile.flags.coupling_type = self.channels.coupling_type();
        profile.flags.power_is_up = self.system.is_power_up();

        let slots = self.channel_slots();
        for (ch, saved) in profile.channels.iter_mut().enumerate() {
            if ch >= slots || !self.channels.is_installed(ch) {
                continue;
            }

            let mut settings = self.channels.settings(ch);
            if !self.channels.has_rprog(ch) {
                settings.rprog_enabled = false;
            }

            *saved = ChannelProfile {
                parameters_are_valid: true,
                module_type: self.channels.module_type(ch),
                module_revision: self.channels.module_revision(ch),
                settings,
                u_trigger_value: self.trigger_voltage(ch),
                i_trigger_value: self.trigger_current(ch),
                list_count: self.lists.list_count(ch),
            };
        }

        let sensors = self.system.temp_sensor_count();
        for (i, prot) in profile.temp_prot.iter_mut().enumerate() {
            *prot = if i < sensors {
                self.system.temperature_protection(i)
            } else {
                default_temp_protection(i)
            };
        }

        profile.flags.is_valid = true;
        profile
    }

    /// Apply `profile` to the instrument. `location` selects the list files to load.
    ///
    /// Fails with [`ScpiError::ExecutionError`] if the profile was taken while powered up and
    /// the instrument does not power up again. Everything else is restored regardless.
    pub fn recall_from_profile(&mut self, profile: &Profile, location: usize) -> Result<()> {
        let was_enabled = self.enable_save(false);

        let powered = if profile.flags.power_is_up {
            self.system.power_up()
        } else {
            self.system.power_down();
            true
        };

        let sensors = self.system.temp_sensor_count().min(TEMP_SENSOR_MAX);
        for (i, prot) in profile.temp_prot.iter().enumerate().take(sensors) {
            self.system.set_temperature_protection(i, prot);
        }

        self.recall_channels(profile, location);

        self.enable_save(was_enabled);

        if powered {
            Ok(())
        } else {
            Err(ScpiError::ExecutionError)
        }
    }

    fn recall_channels(&mut self, profile: &Profile, location: usize) {
        self.trigger_abort();

        if let Err(e) = self.channels.set_coupling_type(profile.flags.coupling_type) {
            self.generate_error(e);
        }

        for ch in 0..self.channel_slots() {
            let saved = &profile.channels[ch];
            if saved.parameters_are_valid {
                let settings = self.restored_settings(ch, saved);
                self.channels.apply_settings(ch, &settings);

                if let Err(e) = self
                    .set_trigger_voltage(ch, saved.u_trigger_value)
                    .and_then(|()| self.set_trigger_current(ch, saved.i_trigger_value))
                {
                    self.generate_error(e);
                }
                self.lists.set_list_count(ch, saved.list_count);
                self.load_profile_list(ch, location);
            }
            self.channels.update(ch);
        }
    }

    /// Settings of `saved` fitted to the module presently installed in `channel`.
    fn restored_settings(&self, channel: usize, saved: &ChannelProfile) -> ChannelSettings {
        let max = self.channels.maxima(channel);
        let mut s = saved.settings;

        s.u_set = s.u_set.min(max.u_max);
        s.u_limit = s.u_limit.min(max.u_max);
        s.i_set = s.i_set.min(max.i_max);
        s.i_limit = s.i_limit.min(max.i_max);
        s.p_limit = s.p_limit.min(max.u_max * max.i_max);

        // Protection never sits below the limit it protects.
        s.protection.u_level = s.protection.u_level.max(s.u_limit);
        s.protection.p_level = s.protection.p_level.max(s.p_limit);

        if self.channels.is_tripped(channel) {
            s.output_enabled = false;
        }
        if !self.channels.has_rprog(channel) {
            s.rprog_enabled = false;
        }

        if s.display_value1 == DisplayValue::Voltage && s.display_value2 == DisplayValue::Voltage {
            s.display_value2 = DisplayValue::Current;
        }
        if s.yt_view_rate == 0.0 {
            s.yt_view_rate = GUI_YT_VIEW_RATE_DEFAULT;
        }
        if s.dprog_state != DprogState::Off {
            s.dprog_state = DprogState::On;
        }

        s
    }

    /// Every valid channel of `profile` was taken with the module type installed now.
    pub fn check_profile_module_match(&self, profile: &Profile) -> Result<()> {
        for ch in 0..self.channel_slots() {
            let saved = &profile.channels[ch];
            if saved.parameters_are_valid && saved.module_type != self.channels.module_type(ch) {
                log::warn!(
                    "profile channel {} was saved with module {}, found {}",
                    ch + 1,
                    saved.module_type,
                    self.channels.module_type(ch)
                );
                return Err(ScpiError::ProfileModuleMismatch);
            }
        }
        Ok(())
    }

    /// Stored profile at `location` whatever its validity flag says.
    fn read_profile(&mut self, location: usize) -> Option<Profile> {
        match self.store.load_profile(location) {
            Ok(profile) => profile,
            Err(e) => {
                storage_error(e, ScpiError::MassStorageError);
                None
            }
        }
    }

    /// The valid profile stored at `location`, if any.
    pub fn load(&mut self, location: usize) -> Option<Profile> {
        if location >= NUM_PROFILE_LOCATIONS {
            return None;
        }
        self.read_profile(location).filter(|p| p.flags.is_valid)
    }

    pub fn is_valid(&mut self, location: usize) -> bool {
        self.load(location).is_some()
    }

    /// Recall the user profile at `location` (`1..NUM_PROFILE_LOCATIONS`).
    pub fn recall(&mut self, location: usize) -> Result<()> {
        if location == 0 || location >= NUM_PROFILE_LOCATIONS {
            return Err(ScpiError::DataOutOfRange);
        }
        let profile = self.load(location).ok_or(ScpiError::CannotLoadEmptyProfile)?;
        self.check_profile_module_match(&profile)?;
        self.recall_from_profile(&profile, location)?;

        self.save(false);
        self.system
            .push_event(Event::RecalledFromProfile(location as u8));
        log::info!("recalled profile {}", location);
        Ok(())
    }

    /// Boot-time recall of the configured location.
    pub(crate) fn auto_recall(&mut self) {
        if !self.config.profile_auto_recall_enabled {
            return;
        }
        let location = self.config.profile_auto_recall_location as usize;
        let Some(profile) = self.load(location) else {
            log::info!("nothing to recall at location {}", location);
            return;
        };

        let result = match self.check_profile_module_match(&profile) {
            Ok(()) => self.recall_from_profile(&profile, location),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.generate_error(e);
        }
    }

    fn save_name(&mut self, location: usize) -> ProfileName {
        match self.read_profile(location) {
            Some(p) if p.flags.is_valid && !p.name.starts_with(AUTO_NAME_PREFIX) => p.name,
            _ => {
                let mut name = ProfileName::new();
                // "Saved at YYYY-MM-DD HH:MM:SS" fits.
                let _ = write!(name, "{}{}", AUTO_NAME_PREFIX, self.system.date_time());
                name
            }
        }
    }

    /// Snapshot the live configuration into `location`.
    ///
    /// Without `name` the slot keeps a user given name, or gets a fresh "Saved at" one.
    pub fn save_at_location(&mut self, location: usize, name: Option<&str>) -> Result<()> {
        if location >= NUM_PROFILE_LOCATIONS {
            return Err(ScpiError::DataOutOfRange);
        }

        let mut profile = self.fill_profile();
        profile.name = match name {
            Some(name) => truncated_name(name),
            None => self.save_name(location),
        };

        self.store
            .save_profile(location, &profile)
            .map_err(|e| storage_error(e, ScpiError::ExternalEepromSaveFailed))?;
        self.save_profile_lists(location);

        log::info!("saved profile {} as \"{}\"", location, profile.name);
        Ok(())
    }

    /// Invalidate the user profile at `location` and delete its list files.
    ///
    /// The record bytes stay on the medium with the validity flag cleared.
    pub fn delete_location(&mut self, location: usize) -> Result<()> {
        if location == 0 || location >= NUM_PROFILE_LOCATIONS {
            return Err(ScpiError::DataOutOfRange);
        }

        if self.config.profile_auto_recall_location as usize == location {
            self.config.profile_auto_recall_location = 0;
            self.persist_config()?;
        }

        self.store
            .invalidate_profile(location)
            .map_err(|e| storage_error(e, ScpiError::ExternalEepromSaveFailed))?;
        self.delete_profile_lists(location);

        log::info!("deleted profile {}", location);
        Ok(())
    }

    pub fn delete_all(&mut self) -> Result<()> {
        for location in 1..NUM_PROFILE_LOCATIONS {
            self.delete_location(location)?;
        }
        Ok(())
    }

    /// Rename the valid user profile at `location`, leaving the rest of the record untouched.
    pub fn set_name(&mut self, location: usize, name: &str) -> Result<()> {
        if location == 0 || location >= NUM_PROFILE_LOCATIONS {
            return Err(ScpiError::DataOutOfRange);
        }
        let mut profile = self.load(location).ok_or(ScpiError::CannotLoadEmptyProfile)?;
        profile.name = truncated_name(name);
        self.store
            .save_profile(location, &profile)
            .map_err(|e| storage_error(e, ScpiError::ExternalEepromSaveFailed))
    }

    /// Name shown for `location`, with placeholders for empty slots.
    pub fn name(&mut self, location: usize) -> ProfileName {
        match self.load(location) {
            Some(profile) => profile.name,
            None if location > 0 => truncated_name("--Empty--"),
            None => truncated_name("--Never used--"),
        }
    }

    /// Enable or disable saving to location `0`, returning the previous setting.
    pub fn enable_save(&mut self, enable: bool) -> bool {
        core::mem::replace(&mut self.save_state.enabled, enable)
    }

    pub fn freeze_state(&self) -> bool {
        self.save_state.freeze
    }

    pub fn set_freeze_state(&mut self, freeze: bool) {
        self.save_state.freeze = freeze;
    }

    pub fn is_profile_dirty(&self) -> bool {
        self.save_state.dirty
    }

    /// Location `0` is only kept up to date when it is the one recalled at boot.
    pub fn is_auto_save_allowed(&self) -> bool {
        self.config.profile_auto_recall_enabled && self.config.profile_auto_recall_location == 0
    }

    /// Record that the live state changed. Only writes right away with `immediately`, otherwise
    /// [`Self::profile_tick`] writes once the instrument is idle.
    pub fn save(&mut self, immediately: bool) {
        if !self.save_state.enabled || self.save_state.freeze || !self.is_auto_save_allowed() {
            return;
        }
        if !immediately {
            self.save_state.dirty = true;
            return;
        }
        match self.do_save() {
            Ok(()) => self.save_state.dirty = false,
            Err(e) => {
                self.save_state.dirty = true;
                self.generate_error(e);
            }
        }
    }

    fn do_save(&mut self) -> Result<()> {
        let profile = self.fill_profile();
        self.store
            .save_profile(0, &profile)
            .map_err(|e| storage_error(e, ScpiError::ExternalEepromSaveFailed))?;
        self.save_profile_lists(0);
        Ok(())
    }

    /// Flush a pending save of location `0` once no list runs, calibration is off and the
    /// instrument is idle. A failed write stays pending for the next tick.
    pub fn profile_tick(&mut self) {
        if !self.save_state.dirty
            || self.lists.is_active()
            || self.system.is_calibration_enabled()
            || !self.system.is_idle()
        {
            return;
        }
        match self.do_save() {
            Ok(()) => {
                log::debug!("flushed live profile");
                self.save_state.dirty = false;
            }
            Err(e) => log::warn!("deferred profile save failed: {}", e),
        }
    }

    /// `false` when there is no usable medium. Mount failures other than missing media or a
    /// missing filesystem are reported.
    fn lists_medium_ready(&mut self) -> bool {
        match self.system.mass_storage_mounted() {
            Ok(()) => true,
            Err(ScpiError::MissingMassMedia | ScpiError::MassMediaNoFilesystem) => false,
            Err(e) => {
                self.generate_error(e);
                false
            }
        }
    }

    fn load_profile_list(&mut self, channel: usize, location: usize) {
        if !self.lists_medium_ready() {
            return;
        }
        let path = profile_list_path(channel, location);
        if !self.system.file_exists(&path) {
            return;
        }
        match self.lists.load_list(channel, &path) {
            Ok(()) if location == 0 => self.lists.set_lists_changed(channel, false),
            Ok(()) => {}
            Err(e) => self.generate_error(e),
        }
    }

    fn save_profile_lists(&mut self, location: usize) {
        let pending =
            (0..self.channel_slots()).any(|ch| location != 0 || self.lists.lists_changed(ch));
        if !pending || !self.lists_medium_ready() {
            return;
        }
        for ch in 0..self.channel_slots() {
            if location == 0 && !self.lists.lists_changed(ch) {
                continue;
            }
            let path = profile_list_path(ch, location);
            match self.lists.save_list(ch, &path) {
                Ok(()) if location == 0 => self.lists.set_lists_changed(ch, false),
                Ok(()) => {}
                Err(e) => self.generate_error(e),
            }
        }
    }

    /// Delete the list files owned by profile `location`.
    pub fn delete_profile_lists(&mut self, location: usize) {
        if !self.lists_medium_ready() {
            return;
        }
        for ch in 0..self.channel_slots() {
            let path = profile_list_path(ch, location);
            if !self.system.file_exists(&path) {
                continue;
            }
            if let Err(e) = self.system.delete_file(&path) {
                self.generate_error(e);
            }
        }
    }

    /// Export a snapshot of the live configuration as a profile block.
    pub fn save_to_writer<W: Write>(&self, writer: &mut W) -> Result<()> {
        let block = encode_profile(&self.fill_profile());
        writer
            .write_all(&block)
            .map_err(|e| storage_error(e, ScpiError::MassStorageError))?;
        writer
            .flush()
            .map_err(|e| storage_error(e, ScpiError::MassStorageError))
    }

    /// Import a profile block exported by [`Self::save_to_writer`].
    ///
    /// The block replaces location `0` and is then recalled.
    pub fn recall_from_reader<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let mut block = [0u8; PROFILE_BLOCK_SIZE];
        let filled = read_full(reader, &mut block)
            .map_err(|e| storage_error(e, ScpiError::MassStorageError))?;
        if filled != PROFILE_BLOCK_SIZE {
            return Err(ScpiError::MassStorageError);
        }
        let profile = decode_profile(&block).ok_or(ScpiError::MassStorageError)?;
        if !profile.flags.is_valid {
            return Err(ScpiError::CannotLoadEmptyProfile);
        }

        self.check_profile_module_match(&profile)?;

        self.store
            .save_profile(0, &profile)
            .map_err(|e| storage_error(e, ScpiError::ExternalEepromSaveFailed))?;
        self.recall_from_profile(&profile, 0)?;

        self.system.push_event(Event::RecalledFromFile);
        log::info!("recalled profile from file");
        Ok(())
    }
}
