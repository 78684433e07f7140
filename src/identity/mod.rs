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

//! Ledger identities management.
//!
//! Identities are enrolled against the network certificate authority and
//! persisted locally, one record per identity, so that a restart reuses the
//! same certificates instead of enrolling again.
//!
//! Known limitation: a persisted identity is trusted as is, credentials
//! revoked by the CA in the meantime are not detected.

use crate::{
    base::{Enrollment, Identity},
    Result,
};

#[cfg(test)]
use mockall::automock;

pub mod store;

pub use store::{IdentityRecord, IdentityStore};

/// Bootstrap secret used by the admin when none is configured.
pub const DEFAULT_ADMIN_SECRET: &str = "adminpw";

/// Request to register a new identity with the certificate authority.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RegistrationRequest {
    /// Enrollment identifier.
    pub id: String,
    pub affiliation: String,
    /// Desired enrollment secret, the CA generates one if `None`.
    pub secret: Option<String>,
}

/// Certificate authority client capability.
#[cfg_attr(test, automock)]
pub trait CertificateAuthority: Send + Sync + 'static {
    /// Enroll `id` using its enrollment `secret`, obtaining a fresh key pair
    /// and certificate.
    fn enroll(&self, id: &str, secret: &str) -> Result<Enrollment>;

    /// Register a new identity on behalf of `registrar`.
    /// Returns the enrollment secret to be used for the first enrollment.
    fn register(&self, request: &RegistrationRequest, registrar: &Identity) -> Result<String>;
}
