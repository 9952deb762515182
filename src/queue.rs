//! Messages posted to the dispatcher.
//!
//! A message is one `u32` word so it can be posted from interrupt handlers and other tasks
//! without sharing memory with the dispatcher:
//!
//! | bits    | field  |
//! |---------|--------|
//! | 0..4    | target |
//! | 4..12   | type   |
//! | 12..32  | param  |

use embassy_sync::{
    blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex},
    channel::Channel,
};
use fugit::MillisDurationU32;
use modular_bitfield::prelude::*;
use strum_macros::{EnumIter, FromRepr};
use thiserror::Error;

use crate::config::QUEUE_SIZE;

/// Largest parameter a queue word can carry.
pub const PARAM_MAX: u32 = (1 << 20) - 1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("parameter does not fit in a queue word")]
    ParamOutOfRange,
    #[error("unknown queue target {0}")]
    UnknownTarget(u8),
    #[error("queue is full")]
    Full,
}

/// Subsystem a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum QueueTarget {
    /// Instrument-wide operations.
    None = 0x00,
    Serial = 0x01,
    Ethernet = 0x02,
    /// Scripting engine.
    Mp = 0x03,
    Trigger = 0x04,
    Profile = 0x05,
    Ui = 0x06,
}

/// Types handled by the dispatcher itself for [`QueueTarget::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum SystemMessage {
    /// Param: profile location.
    DeleteProfileLists = 0x00,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum TriggerMessage {
    Initiate = 0x00,
    Abort = 0x01,
    /// Param: [`TriggerSource`](crate::types::TriggerSource).
    Generate = 0x02,
    StartImmediately = 0x03,
    /// Param: `0` disables, anything else enables.
    EnableContinuous = 0x04,
    /// Param: channel index. Posted by the list executor when a list stops.
    ChannelFinished = 0x05,
}

/// Param of every type but `DeleteAll`, `MarkDirty` and `SaveNow` is the profile location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum ProfileMessage {
    Recall = 0x00,
    Save = 0x01,
    Delete = 0x02,
    DeleteAll = 0x03,
    MarkDirty = 0x04,
    SaveNow = 0x05,
}

#[bitfield(bits = 32)]
#[derive(Clone, Copy)]
struct QueueWord {
    target: B4,
    kind: B8,
    param: B20,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMessage {
    pub target: QueueTarget,
    /// Message type, meaning depends on the target.
    pub kind: u8,
    pub param: u32,
}

impl QueueMessage {
    pub fn new(target: QueueTarget, kind: u8, param: u32) -> Result<Self, QueueError> {
        if param > PARAM_MAX {
            return Err(QueueError::ParamOutOfRange);
        }
        Ok(Self {
            target,
            kind,
            param,
        })
    }

    pub fn system(message: SystemMessage, param: u32) -> Result<Self, QueueError> {
        Self::new(QueueTarget::None, message as u8, param)
    }

    pub fn trigger(message: TriggerMessage, param: u32) -> Result<Self, QueueError> {
        Self::new(QueueTarget::Trigger, message as u8, param)
    }

    pub fn profile(message: ProfileMessage, param: u32) -> Result<Self, QueueError> {
        Self::new(QueueTarget::Profile, message as u8, param)
    }

    pub fn to_word(&self) -> u32 {
        let word = QueueWord::new()
            .with_target(self.target as u8)
            .with_kind(self.kind)
            .with_param(self.param & PARAM_MAX);
        u32::from_le_bytes(word.into_bytes())
    }

    pub fn from_word(word: u32) -> Result<Self, QueueError> {
        let word = QueueWord::from_bytes(word.to_le_bytes());
        let target = QueueTarget::from_repr(word.target())
            .ok_or(QueueError::UnknownTarget(word.target()))?;
        Ok(Self {
            target,
            kind: word.kind(),
            param: word.param(),
        })
    }
}

/// Producer side of the queue. Never blocks, so it is usable from interrupt handlers.
pub trait Outbox {
    fn post(&self, word: u32) -> Result<(), QueueError>;

    fn post_message(&self, message: QueueMessage) -> Result<(), QueueError> {
        self.post(message.to_word())
    }
}

/// Consumer side of the queue, held by the dispatcher only.
pub trait Mailbox: Outbox {
    /// Next word, waiting at most `timeout` for one to arrive.
    fn poll(&self, timeout: MillisDurationU32) -> Option<u32>;
}

/// Queue shared between the producers and the dispatcher, usable from a `static`.
pub type MessageQueue = Channel<CriticalSectionRawMutex, u32, QUEUE_SIZE>;

impl<M: RawMutex, const N: usize> Outbox for Channel<M, u32, N> {
    fn post(&self, word: u32) -> Result<(), QueueError> {
        self.try_send(word).map_err(|_| QueueError::Full)
    }
}

/// Suspends the dispatcher while its queue is empty.
pub trait Pause {
    /// Return after `max` at the latest, or earlier when woken, e.g. by the interrupt which
    /// posted a word.
    fn pause(&self, max: MillisDurationU32);
}

/// A [`Channel`] read by a dispatcher which sleeps through [`Pause`] while the channel is empty.
pub struct PacedQueue<'a, M: RawMutex, P: Pause, const N: usize> {
    queue: &'a Channel<M, u32, N>,
    pause: P,
}

impl<'a, M: RawMutex, P: Pause, const N: usize> PacedQueue<'a, M, P, N> {
    pub fn new(queue: &'a Channel<M, u32, N>, pause: P) -> Self {
        Self { queue, pause }
    }

    pub fn pause(&self) -> &P {
        &self.pause
    }
}

impl<M: RawMutex, P: Pause, const N: usize> Outbox for PacedQueue<'_, M, P, N> {
    fn post(&self, word: u32) -> Result<(), QueueError> {
        self.queue.post(word)
    }
}

impl<M: RawMutex, P: Pause, const N: usize> Mailbox for PacedQueue<'_, M, P, N> {
    fn poll(&self, timeout: MillisDurationU32) -> Option<u32> {
        if let Ok(word) = self.queue.try_receive() {
            return Some(word);
        }
        self.pause.pause(timeout);
        self.queue.try_receive().ok()
    }
}
