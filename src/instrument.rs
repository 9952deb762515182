//! The sequencing engine.
//!
//! [`Instrument`] owns the trigger state machine, the profile persistence state and the
//! collaborators both of them drive. Exactly one execution context, the
//! [`MessageDispatcher`](crate::dispatch::MessageDispatcher), holds it mutably. Other contexts
//! reach it by posting queue words, or stage trigger levels through the shared
//! [`TriggerLevels`].

use embedded_io::{Error, Read, Seek, Write};

use crate::{
    channel::ChannelDispatcher,
    config::{DeviceConfig, NUM_PROFILE_LOCATIONS},
    error::{Result, ScpiError},
    list::ListExecutor,
    profile::SaveState,
    store::ProfileStore,
    system::System,
    trigger::{TriggerLevels, TriggerStatus},
};

pub struct Instrument<'a, C, L, S, Y>
where
    C: ChannelDispatcher,
    L: ListExecutor,
    S: Read + Write + Seek,
    Y: System,
{
    pub(crate) channels: C,
    pub(crate) lists: L,
    pub(crate) store: ProfileStore<S>,
    pub(crate) system: Y,
    pub(crate) config: DeviceConfig,
    pub(crate) levels: &'a TriggerLevels,
    pub(crate) trigger: TriggerStatus,
    pub(crate) save_state: SaveState,
}

impl<'a, C, L, S, Y> Instrument<'a, C, L, S, Y>
where
    C: ChannelDispatcher,
    L: ListExecutor,
    S: Read + Write + Seek,
    Y: System,
{
    /// Create the engine, reading the device configuration from `medium`.
    ///
    /// A missing or corrupt configuration block yields the defaults. Call [`Self::init`] once
    /// the rest of the firmware is up.
    pub fn new(channels: C, lists: L, medium: S, system: Y, levels: &'a TriggerLevels) -> Self {
        let mut store = ProfileStore::new(medium);
        let config = match store.load_device_config() {
            Ok(Some(config)) => config,
            Ok(None) => {
                log::info!("no stored device configuration, using defaults");
                DeviceConfig::default()
            }
            Err(e) => {
                log::warn!("reading device configuration failed: {:?}", e.kind());
                DeviceConfig::default()
            }
        };

        Self {
            channels,
            lists,
            store,
            system,
            config,
            levels,
            trigger: TriggerStatus::default(),
            save_state: SaveState::default(),
        }
    }

    /// Boot sequence: recall the auto-recall profile, then bring up the trigger subsystem.
    pub fn init(&mut self) {
        self.auto_recall();
        self.trigger_init();
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn channels(&self) -> &C {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut C {
        &mut self.channels
    }

    pub fn lists(&self) -> &L {
        &self.lists
    }

    pub fn lists_mut(&mut self) -> &mut L {
        &mut self.lists
    }

    pub fn system(&self) -> &Y {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut Y {
        &mut self.system
    }

    pub fn store(&self) -> &ProfileStore<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ProfileStore<S> {
        &mut self.store
    }

    pub fn levels(&self) -> &'a TriggerLevels {
        self.levels
    }

    /// Report an error which has no synchronous caller to return it to.
    pub fn generate_error(&mut self, error: ScpiError) {
        log::warn!("{} ({})", error, error.code());
        self.system.push_error(error);
    }

    /// Write the device configuration block.
    pub(crate) fn persist_config(&mut self) -> Result<()> {
        self.store
            .save_device_config(&self.config)
            .map_err(|e| storage_error(e, ScpiError::MassStorageError))
    }

    /// Configure which profile is recalled at boot.
    pub fn set_profile_auto_recall(&mut self, enabled: bool, location: usize) -> Result<()> {
        if location >= NUM_PROFILE_LOCATIONS {
            return Err(ScpiError::DataOutOfRange);
        }
        self.config.profile_auto_recall_enabled = enabled;
        self.config.profile_auto_recall_location = location as u8;
        self.persist_config()
    }

    /// Take the engine apart again.
    pub fn release(self) -> (C, L, S, Y) {
        (self.channels, self.lists, self.store.release(), self.system)
    }
}

/// Log a storage medium error and replace it with the protocol error reported for it.
pub(crate) fn storage_error<E: Error>(err: E, reported: ScpiError) -> ScpiError {
    log::warn!("storage medium error: {:?}", err.kind());
    reported
}
