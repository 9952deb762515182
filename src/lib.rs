//! Trigger sequencing and profile persistence for a multi-channel programmable power supply.
//!
//! The crate is the part of the instrument firmware which decides *when* channel outputs
//! change and *what* they are restored to:
//! * [`trigger`] arms, delays and fires the trigger system, applying stepped levels or
//!   starting list programs on every channel.
//! * [`profile`] snapshots the whole instrument state into numbered profile locations on an
//!   EEPROM (or any [embedded_io] medium), recalls it, and keeps location `0` in sync with the
//!   live state.
//! * [`dispatch`] serializes both behind one message queue, so interrupt handlers and other
//!   tasks only ever post a `u32` word.
//!
//! Channel hardware, list programs and the rest of the firmware are reached through the
//! [`channel::ChannelDispatcher`], [`list::ListExecutor`] and [`system::System`] traits.
//!
//! It supports `no-std` environments by use of the `no-std` feature flag.
//!
//! The dispatcher sleeps through a [`queue::Pause`] while its queue is empty, so the loop below
//! only spins when there is work:
//!
//! ```ignore
//! static LEVELS: TriggerLevels = TriggerLevels::new();
//! static QUEUE: MessageQueue = MessageQueue::new();
//!
//! /// Sleeps until the next interrupt, the poll timeout being covered by a timer interrupt.
//! struct WaitForInterrupt;
//!
//! impl Pause for WaitForInterrupt {
//!     fn pause(&self, _max: MillisDurationU32) {
//!         cortex_m::asm::wfi();
//!     }
//! }
//!
//! let mut psu = Instrument::new(channels, lists, eeprom, system, &LEVELS);
//! psu.init();
//! let mailbox = PacedQueue::new(&QUEUE, WaitForInterrupt);
//! let mut dispatcher = MessageDispatcher::new(psu, &mailbox, services);
//! loop {
//!     dispatcher.one_iter();
//! }
//! ```
//!
//! Producers post with [`queue::Outbox::post_message`] on `QUEUE`.

#![cfg_attr(all(feature = "no-std", not(test)), no_std)]

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod instrument;
pub mod list;
pub mod profile;
pub mod queue;
pub mod record;
pub mod store;
pub mod system;
pub mod trigger;
pub mod types;

#[cfg(test)]
mod mock;

pub use dispatch::MessageDispatcher;
pub use error::ScpiError;
pub use instrument::Instrument;
pub use queue::{MessageQueue, Outbox, PacedQueue, Pause, QueueMessage};
pub use trigger::TriggerLevels;
