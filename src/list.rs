//! Interface to the list program executor.

use core::fmt::Write;

use crate::error::Result;

/// Directory holding list program files on the mass storage medium.
pub const LISTS_DIR: &str = "/Lists";

pub const LIST_EXT: &str = ".list";

pub type ListFilePath = heapless::String<48>;

/// Operations consumed from the list program executor.
pub trait ListExecutor {
    fn is_list_empty(&self, channel: usize) -> bool;

    /// Voltage, current and dwell lists have compatible lengths, also across coupled channels.
    fn are_list_lengths_equivalent(&self, channel: usize) -> bool;

    /// Every list point lies within the channel limits.
    fn check_limits(&self, channel: usize) -> Result<()>;

    fn execution_start(&mut self, channel: usize);

    /// Apply list point `index` to the channel outputs.
    fn set_list_value(&mut self, channel: usize, index: usize) -> Result<()>;

    fn max_list_size(&self, channel: usize) -> usize;

    /// Some channel is executing a list.
    fn is_active(&self) -> bool;

    /// Stop every running list immediately.
    fn abort(&mut self);

    fn list_count(&self, channel: usize) -> u16;

    fn set_list_count(&mut self, channel: usize, count: u16);

    /// Lists were edited since they were last saved.
    fn lists_changed(&self, channel: usize) -> bool;

    fn set_lists_changed(&mut self, channel: usize, changed: bool);

    fn load_list(&mut self, channel: usize, path: &str) -> Result<()>;

    fn save_list(&mut self, channel: usize, path: &str) -> Result<()>;
}

/// Path of the list file stored alongside profile `location` for `channel`.
///
/// E.g. channel index `0`, location `3` => `/Lists/PROFILE_1_3.list`.
pub fn profile_list_path(channel: usize, location: usize) -> ListFilePath {
    let mut path = ListFilePath::new();
    // Capacity fits the longest possible path.
    let _ = write!(path, "{}/PROFILE_{}_{}{}", LISTS_DIR, channel + 1, location, LIST_EXT);
    path
}
