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

use std::{collections::HashMap, fmt};

/// Prefix identifying read-only chaincode functions.
const QUERY_FUNCTION_PREFIX: &str = "query";

/// Enrollment material issued by the certificate authority.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Enrollment {
    /// Private key (PEM or DER, opaque to the bridge).
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    /// Signed X.509 certificate (PEM).
    pub certificate: String,
}

// Keep the private key out of the logs.
impl fmt::Debug for Enrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enrollment")
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("certificate", &self.certificate)
            .finish()
    }
}

/// Enrolled ledger identity.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Identity {
    /// Enrollment identifier, unique within the CA.
    pub id: String,
    /// Organizational affiliation (e.g. "org1.department1").
    pub affiliation: String,
    /// Membership service provider identifier (e.g. "Org1MSP").
    pub msp_id: String,
    pub enrollment: Enrollment,
}

/// Identity to be enrolled, as declared by the configuration.
#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct UserSpec {
    pub id: String,
    pub affiliation: String,
    #[serde(rename = "mspid")]
    pub msp_id: String,
    /// Enrollment secret. For the admin this is the bootstrap password, for
    /// other users an optional pre-agreed registration secret.
    #[serde(default, rename = "pw")]
    pub secret: Option<String>,
}

/// Named network endpoint (peer, orderer or event hub).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Endpoint {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Resolved network layout. Built once at startup and never modified.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NetworkTopology {
    /// Certificate authority endpoint.
    pub ca_url: String,
    /// Channel to join.
    pub channel: String,
    /// Chaincode targeted by every proposal.
    pub chaincode: String,
    /// Endorsing peers, in configuration order.
    pub peers: Vec<Endpoint>,
    /// Ordering nodes, in configuration order.
    pub orderers: Vec<Endpoint>,
    pub event_hub: Option<Endpoint>,
}

/// Proposal kind.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RequestKind {
    /// Read-only, never submitted to the ordering service.
    Query,
    /// State changing.
    Invoke,
}

impl RequestKind {
    /// Chaincode functions named `query*` are read-only, everything else is
    /// an invocation.
    pub fn for_function(function: &str) -> Self {
        if function.starts_with(QUERY_FUNCTION_PREFIX) {
            RequestKind::Query
        } else {
            RequestKind::Invoke
        }
    }
}

/// Chaincode proposal.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ProposalRequest {
    pub kind: RequestKind,
    pub chaincode: String,
    pub function: String,
    pub args: Vec<String>,
}

impl ProposalRequest {
    pub fn new(kind: RequestKind, chaincode: &str, function: &str, args: &[&str]) -> Self {
        ProposalRequest {
            kind,
            chaincode: chaincode.to_owned(),
            function: function.to_owned(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

/// Transaction identifier assigned by the network to a proposal.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        TransactionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        TransactionId::new(id)
    }
}

/// Chaincode execution status reported by a peer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Endorsement returned by a single peer for a proposal.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EndorsementResponse {
    /// Name of the endorsing peer.
    pub peer: String,
    /// Transaction identifier of the proposal.
    pub tx_id: TransactionId,
    /// Peer signature successfully verified.
    pub verified: bool,
    pub status: ResponseStatus,
    /// Chaincode response payload.
    pub payload: Vec<u8>,
    /// Status message, carries the failure reason when not successful.
    pub message: String,
}

impl EndorsementResponse {
    /// A response counts only when it is both verified and successful.
    pub fn is_valid(&self) -> bool {
        self.verified && self.status == ResponseStatus::Success
    }
}

/// Single chaincode action within a committed transaction.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TransactionAction {
    pub chaincode: String,
    /// Chaincode input arguments; by convention the first is the function name.
    pub args: Vec<Vec<u8>>,
}

/// Transaction outcome as reported by a delivered block.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TransactionEvent {
    pub tx_id: TransactionId,
    /// Marked valid by the committing peers.
    pub valid: bool,
    /// Network validation code (0 means valid).
    pub validation_code: u8,
    pub actions: Vec<TransactionAction>,
}

impl TransactionEvent {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Name of the invoked chaincode function, i.e. the first argument of the
    /// first action that carries arguments.
    pub fn function_name(&self) -> Option<String> {
        self.actions
            .iter()
            .find_map(|action| action.args.first())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
    }
}

/// Block delivered by the ledger network.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BlockEvent {
    pub number: u64,
    pub transactions: Vec<TransactionEvent>,
}

/// Transaction identifier to invoked function name, for one block.
pub type FunctionMap = HashMap<TransactionId, String>;
