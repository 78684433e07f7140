// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Transaction commit tracking.
//!
//! Every transaction accepted by the ordering service gets a one-shot
//! completion, resolved when a delivered block reports the transaction
//! outcome. Waiting on the [CommitFuture] is purely local: timing out or
//! dropping it never cancels the transaction, which may still commit later.

use crate::{
    base::{BlockEvent, Mutex, TransactionEvent, TransactionId},
    Error, ErrorKind, Result,
};
use futures::channel::oneshot;
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

/// Lifecycle of a submitted transaction, as seen by the waiter.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CommitStatus {
    /// Accepted by the ordering service, outcome not known yet.
    Submitted,
    /// Committed and marked valid by the network.
    CommittedValid,
    /// Committed but marked invalid by the network.
    CommittedInvalid,
    /// The waiter gave up. The transaction outcome is unknown.
    TimedOut,
    /// Submission failed. Reported synchronously by the gateway, never
    /// reached by a [CommitFuture].
    Failed,
}

impl CommitStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommitStatus::Submitted)
    }
}

/// Pending commit completions, indexed by transaction id.
#[derive(Default)]
pub struct CommitTracker {
    pending: Mutex<HashMap<TransactionId, oneshot::Sender<TransactionEvent>>>,
}

impl CommitTracker {
    pub fn new() -> Self {
        CommitTracker::default()
    }

    /// Start tracking `tx_id`.
    ///
    /// # Errors
    ///
    /// `Other` if the transaction is already tracked, handles are never reused.
    pub fn track(&self, tx_id: TransactionId) -> Result<CommitFuture> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&tx_id) {
            return Err(Error::new_ext(
                ErrorKind::Other,
                format!("transaction {} already tracked", tx_id),
            ));
        }
        let (sender, receiver) = oneshot::channel();
        pending.insert(tx_id.clone(), sender);
        debug!("[commit] tracking {}", tx_id);
        Ok(CommitFuture {
            tx_id,
            receiver,
            status: CommitStatus::Submitted,
            event: None,
        })
    }

    /// Stop tracking a transaction whose submission failed.
    pub fn forget(&self, tx_id: &TransactionId) -> bool {
        self.pending.lock().remove(tx_id).is_some()
    }

    /// Resolve the waiter of a terminal transaction event.
    /// Returns true if a waiter has been notified.
    pub fn on_transaction(&self, event: &TransactionEvent) -> bool {
        let sender = match self.pending.lock().remove(&event.tx_id) {
            Some(sender) => sender,
            None => return false,
        };
        match sender.send(event.clone()) {
            Ok(()) => {
                debug!(
                    "[commit] {} committed (valid = {}, code = {})",
                    event.tx_id, event.valid, event.validation_code
                );
                true
            }
            Err(_) => {
                warn!(
                    "[commit] {} committed (valid = {}, code = {}) after its waiter gave up",
                    event.tx_id, event.valid, event.validation_code
                );
                false
            }
        }
    }

    /// Resolve every tracked transaction contained in `block`.
    /// Returns the number of notified waiters.
    pub fn on_block(&self, block: &BlockEvent) -> usize {
        let notified = block
            .transactions
            .iter()
            .filter(|event| self.on_transaction(event))
            .count();
        self.purge();
        notified
    }

    /// Number of transactions still awaiting their commit.
    pub fn pending(&self) -> usize {
        self.purge();
        self.pending.lock().len()
    }

    /// Drop completions whose waiter is gone.
    fn purge(&self) {
        self.pending.lock().retain(|_, sender| !sender.is_canceled());
    }
}

/// Awaitable commit outcome of a submitted transaction.
///
/// Resolves with the transaction event (valid or invalid). Can be awaited
/// directly, without bound, or through [CommitFuture::wait] with a timeout.
pub struct CommitFuture {
    tx_id: TransactionId,
    receiver: oneshot::Receiver<TransactionEvent>,
    status: CommitStatus,
    event: Option<TransactionEvent>,
}

impl CommitFuture {
    pub fn tx_id(&self) -> &TransactionId {
        &self.tx_id
    }

    pub fn status(&self) -> CommitStatus {
        self.status
    }

    /// Network validation code of the committed transaction.
    /// Tells why a `CommittedInvalid` transaction was refused.
    pub fn validation_code(&self) -> Option<u8> {
        self.event.as_ref().map(|event| event.validation_code)
    }

    /// Wait for the commit, up to `timeout`.
    ///
    /// # Errors
    ///
    /// `CommitTimeout` if no outcome is observed in time. Timing out is
    /// terminal for this handle: later outcomes are not delivered to it.
    pub async fn wait(&mut self, timeout: Duration) -> Result<TransactionEvent> {
        if self.status.is_terminal() {
            return self.terminal_result();
        }
        match async_std::future::timeout(timeout, &mut *self).await {
            Ok(res) => res,
            Err(_) => {
                self.status = CommitStatus::TimedOut;
                self.receiver.close();
                debug!("[commit] gave up waiting for {}", self.tx_id);
                self.terminal_result()
            }
        }
    }

    /// Wait for the commit with timeout, synchronous wrapper.
    pub fn wait_sync(&mut self, timeout: Duration) -> Result<TransactionEvent> {
        async_std::task::block_on(self.wait(timeout))
    }

    fn terminal_result(&self) -> Result<TransactionEvent> {
        match (&self.status, &self.event) {
            (CommitStatus::TimedOut, _) => Err(Error::new_ext(
                ErrorKind::CommitTimeout,
                format!("transaction {} outcome unknown", self.tx_id),
            )),
            (_, Some(event)) => Ok(event.clone()),
            _ => Err(delivery_closed(&self.tx_id)),
        }
    }

    fn resolve(&mut self, event: TransactionEvent) -> TransactionEvent {
        self.status = if event.is_valid() {
            CommitStatus::CommittedValid
        } else {
            CommitStatus::CommittedInvalid
        };
        self.event = Some(event.clone());
        event
    }
}

fn delivery_closed(tx_id: &TransactionId) -> Error {
    Error::new_ext(
        ErrorKind::BadNetwork,
        format!("block delivery closed before {} committed", tx_id),
    )
}

impl Future for CommitFuture {
    type Output = Result<TransactionEvent>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.status.is_terminal() {
            return Poll::Ready(this.terminal_result());
        }
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(event)) => Poll::Ready(Ok(this.resolve(event))),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(delivery_closed(&this.tx_id))),
            Poll::Pending => Poll::Pending,
        }
    }
}
