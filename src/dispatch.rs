//! The single consumer of the message queue.
//!
//! Every request which changes trigger, profile or channel state is posted to the queue and
//! executed here, one at a time. When no message arrives within the poll timeout the dispatcher
//! runs a tick pass instead, so periodic work never interleaves with a request.

use embedded_io::{Read, Seek, Write};

use crate::{
    channel::ChannelDispatcher,
    config::POLL_TIMEOUT,
    error::{Result, ScpiError},
    instrument::Instrument,
    list::ListExecutor,
    queue::{Mailbox, ProfileMessage, QueueMessage, QueueTarget, SystemMessage, TriggerMessage},
    system::{Duration, Instant, System},
    types::TriggerSource,
};

/// Firmware services driven by the dispatcher but living outside the sequencing engine.
pub trait Services {
    /// Messages for the protocol, network, scripting and UI targets, and instrument-wide
    /// message types the dispatcher does not handle itself.
    fn on_queue_message(&mut self, message: QueueMessage);

    /// Drain the protocol event queue.
    fn event_queue_tick(&mut self) {}

    /// Drain the audio feedback queue.
    fn sound_tick(&mut self) {}

    /// Network time synchronisation, once per second.
    fn ntp_tick(&mut self) {}

    /// Advance the on-time counters, once per second.
    fn ontime_tick(&mut self, _now: Instant) {}

    /// Mass storage housekeeping.
    fn storage_tick(&mut self) {}
}

pub struct MessageDispatcher<'a, C, L, S, Y, M, V>
where
    C: ChannelDispatcher,
    L: ListExecutor,
    S: Read + Write + Seek,
    Y: System,
    M: Mailbox,
    V: Services,
{
    instrument: Instrument<'a, C, L, S, Y>,
    mailbox: &'a M,
    services: V,
    /// Start of the current one second period.
    last_second: Instant,
}

impl<'a, C, L, S, Y, M, V> MessageDispatcher<'a, C, L, S, Y, M, V>
where
    C: ChannelDispatcher,
    L: ListExecutor,
    S: Read + Write + Seek,
    Y: System,
    M: Mailbox,
    V: Services,
{
    pub fn new(instrument: Instrument<'a, C, L, S, Y>, mailbox: &'a M, services: V) -> Self {
        let last_second = instrument.system().now();
        Self {
            instrument,
            mailbox,
            services,
            last_second,
        }
    }

    pub fn instrument(&self) -> &Instrument<'a, C, L, S, Y> {
        &self.instrument
    }

    pub fn instrument_mut(&mut self) -> &mut Instrument<'a, C, L, S, Y> {
        &mut self.instrument
    }

    pub fn services(&self) -> &V {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut V {
        &mut self.services
    }

    pub fn release(self) -> (Instrument<'a, C, L, S, Y>, V) {
        (self.instrument, self.services)
    }

    /// Handle the next message, or run a tick pass if none arrives in time.
    pub fn one_iter(&mut self) {
        match self.mailbox.poll(POLL_TIMEOUT) {
            Some(word) => self.process(word),
            None => self.tick(),
        }
    }

    /// Decode and route one queue word.
    pub fn process(&mut self, word: u32) {
        match QueueMessage::from_word(word) {
            Ok(message) => self.route(message),
            Err(e) => log::warn!("dropping queue word {:#010x}: {}", word, e),
        }
    }

    fn route(&mut self, message: QueueMessage) {
        let result = match message.target {
            QueueTarget::None => match SystemMessage::from_repr(message.kind) {
                Some(SystemMessage::DeleteProfileLists) => {
                    self.instrument.delete_profile_lists(message.param as usize);
                    Ok(())
                }
                None => {
                    self.services.on_queue_message(message);
                    Ok(())
                }
            },
            QueueTarget::Trigger => self.route_trigger(message),
            QueueTarget::Profile => self.route_profile(message),
            QueueTarget::Serial | QueueTarget::Ethernet | QueueTarget::Mp | QueueTarget::Ui => {
                self.services.on_queue_message(message);
                Ok(())
            }
        };

        if let Err(e) = result {
            self.instrument.generate_error(e);
        }
    }

    fn route_trigger(&mut self, message: QueueMessage) -> Result<()> {
        let Some(kind) = TriggerMessage::from_repr(message.kind) else {
            log::warn!("unknown trigger message type {}", message.kind);
            return Ok(());
        };

        let psu = &mut self.instrument;
        match kind {
            TriggerMessage::Initiate => psu.initiate(),
            TriggerMessage::Abort => {
                psu.trigger_abort();
                Ok(())
            }
            TriggerMessage::Generate => {
                let source = u8::try_from(message.param)
                    .ok()
                    .and_then(TriggerSource::from_repr)
                    .ok_or(ScpiError::DataOutOfRange)?;
                psu.generate_trigger(source, true)
            }
            TriggerMessage::StartImmediately => psu.start_immediately(),
            TriggerMessage::EnableContinuous => psu.enable_initiate_continuous(message.param != 0),
            TriggerMessage::ChannelFinished => {
                psu.set_trigger_finished(message.param as usize);
                Ok(())
            }
        }
    }

    fn route_profile(&mut self, message: QueueMessage) -> Result<()> {
        let Some(kind) = ProfileMessage::from_repr(message.kind) else {
            log::warn!("unknown profile message type {}", message.kind);
            return Ok(());
        };

        let psu = &mut self.instrument;
        let location = message.param as usize;
        match kind {
            ProfileMessage::Recall => psu.recall(location),
            ProfileMessage::Save => psu.save_at_location(location, None),
            ProfileMessage::Delete => psu.delete_location(location),
            ProfileMessage::DeleteAll => psu.delete_all(),
            ProfileMessage::MarkDirty => {
                psu.save(false);
                Ok(())
            }
            ProfileMessage::SaveNow => {
                psu.save(true);
                Ok(())
            }
        }
    }

    /// Periodic work. Called by [`Self::one_iter`] whenever the poll times out.
    pub fn tick(&mut self) {
        self.services.event_queue_tick();
        self.services.sound_tick();

        let now = self.instrument.system().now();

        // Advance by whole seconds so the remainder carries over to the next period.
        let second = Duration::secs(1);
        let mut second_elapsed = false;
        while now
            .checked_duration_since(self.last_second)
            .is_some_and(|elapsed| elapsed >= second)
        {
            self.last_second = self.last_second + second;
            second_elapsed = true;
        }
        if second_elapsed {
            self.instrument.profile_tick();
            self.services.ntp_tick();
            self.services.ontime_tick(now);
        }

        self.instrument.trigger_tick(now);
        self.services.storage_tick();
    }
}
