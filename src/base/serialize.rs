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

//! Serialization helpers.
//!
//! Records owned by the bridge (e.g. persisted identities) use MessagePack,
//! chaincode payloads are usually JSON documents produced by the contract.

use crate::{Error, ErrorKind, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Serialize using MessagePack format (without field names).
///
/// # Error
///
/// If the data cannot be serialized a `MalformedData` error kind is returned.
pub fn rmp_serialize<T>(val: &T) -> Result<Vec<u8>>
where
    T: Serialize,
{
    rmp_serde::to_vec(val).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

/// Deserialize using MessagePack format.
///
/// # Error
///
/// If the data cannot be deserialized a `MalformedData` error kind is returned.
pub fn rmp_deserialize<'a, T>(buf: &'a [u8]) -> Result<T>
where
    T: Deserialize<'a>,
{
    rmp_serde::from_slice(buf).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

/// Deserialize a JSON document, typically a chaincode response payload.
///
/// # Error
///
/// If the payload is not valid JSON for `T` a `MalformedData` error kind is returned.
pub fn json_deserialize<T>(buf: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(buf).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
    struct PeerEntry {
        name: String,
        url: String,
        #[serde(with = "serde_bytes")]
        tls_hash: Vec<u8>,
        roles: Vec<u8>,
    }

    fn create_test_entry() -> PeerEntry {
        PeerEntry {
            name: "peer0.org1.example.com".to_string(),
            url: "grpc://localhost:7051".to_string(),
            tls_hash: vec![0x01, 0xFF, 0x80],
            roles: vec![1, 2],
        }
    }

    const PEER_ENTRY_HEX: &str = "94b670656572302e6f7267312e6578616d706c652e636f6db5677270633a2f2f6c6f63616c686f73743a37303531c40301ff80920102";

    #[test]
    fn peer_entry_serialize() {
        let entry = create_test_entry();

        let buf = rmp_serialize(&entry).unwrap();

        assert_eq!(hex::encode(&buf), PEER_ENTRY_HEX);
    }

    #[test]
    fn peer_entry_deserialize() {
        let buf = hex::decode(PEER_ENTRY_HEX).unwrap();

        let entry: PeerEntry = rmp_deserialize(&buf).unwrap();

        assert_eq!(entry, create_test_entry());
    }

    #[test]
    fn truncated_buffer_is_malformed() {
        let buf = hex::decode(PEER_ENTRY_HEX).unwrap();

        let err = rmp_deserialize::<PeerEntry>(&buf[..10]).unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn json_payload() {
        let payload = br#"{"make":"Skoda","model":"MB1000","colour":"Yellow","owner":"Lukas"}"#;

        let value: serde_json::Value = json_deserialize(payload).unwrap();

        assert_eq!(value["owner"], "Lukas");
    }

    #[test]
    fn json_payload_malformed() {
        let err = json_deserialize::<serde_json::Value>(b"Response failed").unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }
}
