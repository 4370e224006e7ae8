//! Dispatcher - routes events to worker mailboxes by key hash

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SinkError;
use crate::error_signal::ErrorSignal;
use crate::worker::Message;

/// Mailbox for `key` in a pool of `num_workers`.
///
/// IEEE CRC-32 of the key, so the mapping is stable for the life of the sink
/// and every update to one key lands in the same FIFO mailbox.
pub fn worker_index(key: &[u8], num_workers: usize) -> usize {
    crc32fast::hash(key) as usize % num_workers
}

/// Sending halves of every worker mailbox
pub(crate) struct Dispatcher {
    mailboxes: Vec<mpsc::Sender<Message>>,
}

impl Dispatcher {
    /// Create `num_workers` bounded mailboxes; the receivers go to the workers
    pub fn new(num_workers: usize, capacity: usize) -> (Self, Vec<mpsc::Receiver<Message>>) {
        let (mailboxes, receivers) = (0..num_workers).map(|_| mpsc::channel(capacity)).unzip();
        (Self { mailboxes }, receivers)
    }

    pub fn num_workers(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn index_for(&self, key: &[u8]) -> usize {
        worker_index(key, self.mailboxes.len())
    }

    /// Wait for a free slot in mailbox `index`.
    ///
    /// Races sink cancellation (which includes a recorded error), caller
    /// cancellation and the slot itself. Nothing is moved into the mailbox
    /// until the returned permit is used, so losing the race leaves the
    /// event with the caller.
    pub async fn reserve(
        &self,
        index: usize,
        caller: &CancellationToken,
        errors: &ErrorSignal,
    ) -> Result<mpsc::Permit<'_, Message>, SinkError> {
        tokio::select! {
            biased;
            _ = errors.cancelled() => Err(errors.stop_reason()),
            _ = caller.cancelled() => Err(SinkError::Cancelled),
            permit = self.mailboxes[index].reserve() => permit.map_err(|_| errors.stop_reason()),
        }
    }

    /// Hand `message` to mailbox `index`, dropping it if the race is lost
    pub async fn hand_off(
        &self,
        index: usize,
        message: Message,
        caller: &CancellationToken,
        errors: &ErrorSignal,
    ) -> Result<(), SinkError> {
        let permit = self.reserve(index, caller, errors).await?;
        permit.send(message);
        Ok(())
    }
}
