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

//! Ledger gateway components.
//!
//! The gateway talks to the ledger network through the [LedgerNetwork] and
//! [LedgerChannel] capabilities and is composed by several sub-modules:
//! - endorsement: proposal responses validity policy.
//! - commit: transaction commit tracking.
//! - pubsub: block notifications fan-out.
//! - service: the gateway itself, exposing query and invoke.
//!
//! Block delivery is pushed by the network on its own threads. The event bus
//! registered as channel block listener first resolves pending commits, then
//! notifies the subscribers.

use crate::{
    base::{BlockEvent, Endpoint, EndorsementResponse, Identity, ProposalRequest},
    Result,
};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

pub mod commit;
pub mod endorsement;
pub mod pubsub;
pub mod service;

pub use commit::{CommitFuture, CommitStatus, CommitTracker};
pub use pubsub::{BlockEventBus, BlockUpdateListener};
pub use service::{CallOutcome, Gateway};

/// Receiver of every block delivered on a channel.
pub trait BlockListener: Send + Sync + 'static {
    fn received(&self, block: &BlockEvent);
}

/// Ledger network client capability.
#[cfg_attr(test, automock(type Channel = MockLedgerChannel;))]
pub trait LedgerNetwork: Send + Sync + 'static {
    /// Type representing a channel handle.
    type Channel: LedgerChannel;

    /// Create a new, not yet initialized, channel bound to `user`.
    fn new_channel(&self, name: &str, user: &Identity) -> Result<Self::Channel>;
}

/// Channel handle.
/// Topology mutators are only used before `initialize`.
#[cfg_attr(test, automock)]
pub trait LedgerChannel: Send + Sync + 'static {
    /// Add an endorsing peer.
    fn add_peer(&mut self, peer: &Endpoint) -> Result<()>;

    /// Add an ordering node.
    fn add_orderer(&mut self, orderer: &Endpoint) -> Result<()>;

    /// Add a dedicated block events source.
    fn add_event_hub(&mut self, hub: &Endpoint) -> Result<()>;

    /// Register the receiver of the delivered blocks.
    fn register_block_listener(&mut self, listener: Arc<dyn BlockListener>) -> Result<()>;

    /// Connect the channel. Blocks start being delivered afterwards.
    fn initialize(&mut self) -> Result<()>;

    /// Send a proposal to every channel peer, collecting one response per peer.
    fn send_proposal(&self, request: &ProposalRequest) -> Result<Vec<EndorsementResponse>>;

    /// Submit an endorsed transaction to the ordering service.
    fn send_transaction(&self, responses: &[EndorsementResponse]) -> Result<()>;

    /// Release the network resources.
    fn shutdown(&mut self);
}
