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

//! Ledger gateway.
//!
//! Holds the channel opened on behalf of the admin identity and exposes the
//! chaincode operations. Queries are a single proposal round trip, invokes are
//! endorsed, checked against the unanimous policy and then submitted to the
//! ordering service, returning a [CommitFuture] resolved by block delivery.

use super::{
    commit::{CommitFuture, CommitTracker},
    endorsement,
    pubsub::{BlockEventBus, BlockUpdateListener},
    LedgerChannel, LedgerNetwork,
};
use crate::{
    base::{
        serialize::json_deserialize, EndorsementResponse, FunctionMap, Identity,
        NetworkTopology, ProposalRequest, RequestKind, TransactionEvent, TransactionId,
    },
    channel::Receiver,
    config::{self, DEFAULT_COMMIT_TIMEOUT},
    Error, ErrorKind, Result,
};
use serde::de::DeserializeOwned;
use std::{sync::Arc, time::Duration};

/// Result of a routed chaincode call.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum CallOutcome {
    /// Raw responses of a read-only call.
    Query(Vec<EndorsementResponse>),
    /// Committed transaction of a state changing call.
    Committed(TransactionEvent),
}

/// Ledger gateway bound to a single channel.
pub struct Gateway<C: LedgerChannel> {
    channel: C,
    topology: NetworkTopology,
    user: Identity,
    bus: Arc<BlockEventBus>,
    tracker: Arc<CommitTracker>,
    commit_timeout: Duration,
}

impl<C: LedgerChannel> Gateway<C> {
    /// Open the topology channel on behalf of `admin`.
    ///
    /// Every endpoint is checked before touching the network. On failure the
    /// partially built channel is shut down, there is no retry.
    pub fn open<N>(network: &N, topology: NetworkTopology, admin: Identity) -> Result<Self>
    where
        N: LedgerNetwork<Channel = C>,
    {
        check_topology(&topology)?;

        let mut channel = network.new_channel(&topology.channel, &admin)?;
        let tracker = Arc::new(CommitTracker::new());
        let bus = Arc::new(BlockEventBus::with_commit_tracker(tracker.clone()));
        if let Err(err) = setup_channel(&mut channel, &topology, bus.clone()) {
            error!(
                "[gateway] channel '{}' setup failure: {}",
                topology.channel,
                err.to_string_full()
            );
            channel.shutdown();
            return Err(err);
        }
        info!(
            "[gateway] channel '{}' open as '{}' ({} peers, {} orderers)",
            topology.channel,
            admin.id,
            topology.peers.len(),
            topology.orderers.len()
        );

        Ok(Gateway {
            channel,
            topology,
            user: admin,
            bus,
            tracker,
            commit_timeout: Duration::from_secs(DEFAULT_COMMIT_TIMEOUT),
        })
    }

    /// Bound used by [Gateway::call] while waiting for commits.
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Read-only proposal. Responses are returned as they are.
    pub fn query(&self, function: &str, args: &[&str]) -> Result<Vec<EndorsementResponse>> {
        let request = self.request(RequestKind::Query, function, args);
        let responses = self.channel.send_proposal(&request)?;
        debug!(
            "[gateway] query '{}' got {} responses",
            function,
            responses.len()
        );
        Ok(responses)
    }

    /// Payload of the first successful query response.
    pub fn query_first(&self, function: &str, args: &[&str]) -> Result<Vec<u8>> {
        let responses = self.query(function, args)?;
        endorsement::first_successful(&responses).map(|response| response.payload.clone())
    }

    /// First successful query payload, decoded as JSON.
    pub fn query_json<T: DeserializeOwned>(&self, function: &str, args: &[&str]) -> Result<T> {
        let payload = self.query_first(function, args)?;
        json_deserialize(&payload)
    }

    /// State changing proposal.
    ///
    /// # Errors
    ///
    /// `ProposalRejected` if any endorsement is invalid, nothing is submitted
    /// in this case. `SubmissionFault` if the ordering service refuses the
    /// endorsed transaction.
    pub fn invoke(&self, function: &str, args: &[&str]) -> Result<CommitFuture> {
        let request = self.request(RequestKind::Invoke, function, args);
        let responses = self.channel.send_proposal(&request)?;

        if !endorsement::all_valid(&responses) {
            let invalid = endorsement::invalid_responses(&responses);
            for response in invalid.iter() {
                error!(
                    "[gateway] '{}' rejected by {}: {}",
                    function, response.peer, response.message
                );
            }
            return Err(Error::new_ext(
                ErrorKind::ProposalRejected,
                format!(
                    "'{}' endorsed by {} of {} peers",
                    function,
                    responses.len() - invalid.len(),
                    responses.len()
                ),
            ));
        }

        let tx_id = transaction_id(&responses)?;
        // Tracked before submission, the commit may be delivered at any time.
        let fut = self.tracker.track(tx_id.clone())?;
        if let Err(err) = self.channel.send_transaction(&responses) {
            self.tracker.forget(&tx_id);
            let reason = err.to_string_full();
            error!(
                "[gateway] '{}' ({}) submission failure: {}",
                function, tx_id, reason
            );
            return Err(Error::new_ext(ErrorKind::SubmissionFault, reason));
        }
        debug!("[gateway] '{}' submitted as {}", function, tx_id);
        Ok(fut)
    }

    /// Dispatch a call by function name, waiting for the commit of invokes.
    pub fn call(&self, function: &str, args: &[&str]) -> Result<CallOutcome> {
        match RequestKind::for_function(function) {
            RequestKind::Query => self.query(function, args).map(CallOutcome::Query),
            RequestKind::Invoke => {
                let mut fut = self.invoke(function, args)?;
                let event = fut.wait_sync(self.commit_timeout)?;
                Ok(CallOutcome::Committed(event))
            }
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn BlockUpdateListener>) -> bool {
        self.bus.subscribe(listener)
    }

    pub fn subscribe_channel(&self) -> Receiver<FunctionMap> {
        self.bus.subscribe_channel()
    }

    pub fn unsubscribe<L>(&self, listener: &Arc<L>) -> bool
    where
        L: BlockUpdateListener + ?Sized,
    {
        self.bus.unsubscribe(listener)
    }

    pub fn event_bus(&self) -> &Arc<BlockEventBus> {
        &self.bus
    }

    /// Submitted transactions still waiting for their block.
    pub fn pending_commits(&self) -> usize {
        self.tracker.pending()
    }

    pub fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    pub fn user(&self) -> &Identity {
        &self.user
    }

    pub fn commit_timeout(&self) -> Duration {
        self.commit_timeout
    }

    /// Release the channel.
    pub fn close(mut self) {
        self.channel.shutdown();
        info!("[gateway] channel '{}' closed", self.topology.channel);
    }

    fn request(&self, kind: RequestKind, function: &str, args: &[&str]) -> ProposalRequest {
        ProposalRequest::new(kind, &self.topology.chaincode, function, args)
    }
}

fn check_topology(topology: &NetworkTopology) -> Result<()> {
    if topology.channel.is_empty() || topology.chaincode.is_empty() {
        return Err(Error::new_ext(
            ErrorKind::Configuration,
            "channel and chaincode are required",
        ));
    }
    if topology.peers.is_empty() || topology.orderers.is_empty() {
        return Err(Error::new_ext(
            ErrorKind::Configuration,
            "at least one peer and one orderer are required",
        ));
    }
    topology
        .peers
        .iter()
        .chain(topology.orderers.iter())
        .chain(topology.event_hub.iter())
        .try_for_each(config::validate_endpoint)
}

fn setup_channel<C: LedgerChannel>(
    channel: &mut C,
    topology: &NetworkTopology,
    bus: Arc<BlockEventBus>,
) -> Result<()> {
    for peer in topology.peers.iter() {
        channel.add_peer(peer)?;
    }
    for orderer in topology.orderers.iter() {
        channel.add_orderer(orderer)?;
    }
    if let Some(hub) = &topology.event_hub {
        channel.add_event_hub(hub)?;
    }
    channel.register_block_listener(bus)?;
    channel.initialize()
}

/// Transaction id shared by the whole endorsement set.
fn transaction_id(responses: &[EndorsementResponse]) -> Result<TransactionId> {
    let tx_id = match responses.first() {
        Some(response) => response.tx_id.clone(),
        None => return Err(Error::new_ext(ErrorKind::MalformedData, "no endorsements")),
    };
    if responses.iter().any(|response| response.tx_id != tx_id) {
        return Err(Error::new_ext(
            ErrorKind::MalformedData,
            "endorsements for different transactions",
        ));
    }
    Ok(tx_id)
}
