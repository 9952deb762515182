//! Placement of the device configuration and profile blocks on the storage medium.
//!
//! You can create a [`ProfileStore`] over any medium which implements [embedded_io::Read],
//! [embedded_io::Write] and [embedded_io::Seek], e.g. an external EEPROM driver or a file.
//!
//! Layout, from offset `0`:
//! * the device configuration block
//! * one profile block per location, `0..NUM_PROFILE_LOCATIONS`

use embedded_io::{Read, Seek, SeekFrom, Write};

use crate::{
    config::{DeviceConfig, NUM_PROFILE_LOCATIONS},
    profile::Profile,
    record::{
        CONFIG_BLOCK_SIZE, PROFILE_BLOCK_SIZE, decode_config, decode_profile, encode_config,
        encode_profile, invalidate_profile_block,
    },
};

pub struct ProfileStore<S: Read + Write + Seek> {
    medium: S,
}

impl<S: Read + Write + Seek> ProfileStore<S> {
    pub fn new(medium: S) -> Self {
        Self { medium }
    }

    /// Give back the underlying medium.
    pub fn release(self) -> S {
        self.medium
    }

    pub fn medium(&self) -> &S {
        &self.medium
    }

    pub fn medium_mut(&mut self) -> &mut S {
        &mut self.medium
    }

    fn profile_offset(location: usize) -> u64 {
        (CONFIG_BLOCK_SIZE + location * PROFILE_BLOCK_SIZE) as u64
    }

    /// Fill `buf` from `offset`. Returns `false` when the medium ends before `buf` is full.
    fn read_block(&mut self, offset: u64, buf: &mut [u8]) -> Result<bool, S::Error> {
        self.medium.seek(SeekFrom::Start(offset))?;
        Ok(read_full(&mut self.medium, buf)? == buf.len())
    }

    fn write_block(&mut self, offset: u64, buf: &[u8]) -> Result<(), S::Error> {
        self.medium.seek(SeekFrom::Start(offset))?;
        self.medium.write_all(buf)?;
        self.medium.flush()
    }

    /// Read the profile stored at `location`.
    ///
    /// Returns `None` for a block which is missing or fails its checksum/version check. The
    /// validity flag is not looked at here, see [`Profile::flags`].
    pub fn load_profile(&mut self, location: usize) -> Result<Option<Profile>, S::Error> {
        if location >= NUM_PROFILE_LOCATIONS {
            return Ok(None);
        }
        let mut block = [0u8; PROFILE_BLOCK_SIZE];
        if !self.read_block(Self::profile_offset(location), &mut block)? {
            return Ok(None);
        }
        let profile = decode_profile(&block);
        if profile.is_none() {
            log::debug!("no usable profile block at location {}", location);
        }
        Ok(profile)
    }

    pub fn save_profile(&mut self, location: usize, profile: &Profile) -> Result<(), S::Error> {
        let block = encode_profile(profile);
        self.write_block(Self::profile_offset(location), &block)
    }

    /// Clear the validity flag of the block at `location`, leaving the rest of it in place.
    ///
    /// Returns `false` if there was no sound block to invalidate.
    pub fn invalidate_profile(&mut self, location: usize) -> Result<bool, S::Error> {
        if location >= NUM_PROFILE_LOCATIONS {
            return Ok(false);
        }
        let offset = Self::profile_offset(location);
        let mut block = [0u8; PROFILE_BLOCK_SIZE];
        if !self.read_block(offset, &mut block)? || !invalidate_profile_block(&mut block) {
            return Ok(false);
        }
        self.write_block(offset, &block)?;
        Ok(true)
    }

    pub fn load_device_config(&mut self) -> Result<Option<DeviceConfig>, S::Error> {
        let mut block = [0u8; CONFIG_BLOCK_SIZE];
        if !self.read_block(0, &mut block)? {
            return Ok(None);
        }
        Ok(decode_config(&block))
    }

    pub fn save_device_config(&mut self, config: &DeviceConfig) -> Result<(), S::Error> {
        let block = encode_config(config);
        self.write_block(0, &block)
    }
}

/// Read until `buf` is full or `reader` runs dry, returning the number of bytes read.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, R::Error> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
