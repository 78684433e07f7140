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

use super::{CertificateAuthority, RegistrationRequest, DEFAULT_ADMIN_SECRET};
use crate::{
    base::{
        serialize::{rmp_deserialize, rmp_serialize},
        Identity, Mutex, UserSpec,
    },
    Error, ErrorKind, Result,
};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Current persisted record format.
pub const IDENTITY_RECORD_VERSION: u8 = 1;

/// Persisted identity file extension.
const RECORD_EXT: &str = "id";

/// Persisted identity record.
/// WARNING: ANY MODIFICATION MUST BUMP `IDENTITY_RECORD_VERSION`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct IdentityRecord {
    /// Record format version.
    pub version: u8,
    pub identity: Identity,
}

impl IdentityRecord {
    pub fn new(identity: Identity) -> Self {
        IdentityRecord {
            version: IDENTITY_RECORD_VERSION,
            identity,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serialize(self)
    }

    /// Decode a record, rejecting unknown format versions.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let record: IdentityRecord = rmp_deserialize(buf)?;
        if record.version != IDENTITY_RECORD_VERSION {
            return Err(Error::new_ext(
                ErrorKind::MalformedData,
                format!("unsupported identity record version {}", record.version),
            ));
        }
        Ok(record)
    }
}

/// Enrolls identities and keeps them on disk, one record per identity id.
pub struct IdentityStore<C: CertificateAuthority> {
    /// Certificate authority client.
    ca: C,
    /// Records directory.
    dir: PathBuf,
    /// Registrar configuration.
    admin: UserSpec,
    /// Registrar identity, once obtained.
    registrar: Mutex<Option<Identity>>,
}

impl<C: CertificateAuthority> IdentityStore<C> {
    pub fn new(ca: C, dir: impl Into<PathBuf>, admin: UserSpec) -> Self {
        IdentityStore {
            ca,
            dir: dir.into(),
            admin,
            registrar: Mutex::new(None),
        }
    }

    /// Records directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the admin identity, enrolling it only if no record exists.
    pub fn ensure_admin(&self) -> Result<Identity> {
        let mut registrar = self.registrar.lock();
        if let Some(admin) = registrar.as_ref() {
            return Ok(admin.clone());
        }
        let spec = &self.admin;
        let admin = match self.load(&spec.id)? {
            Some(admin) => {
                debug!("[identity] '{}' loaded from disk", spec.id);
                admin
            }
            None => {
                let secret = spec.secret.as_deref().unwrap_or(DEFAULT_ADMIN_SECRET);
                let enrollment = self
                    .ca
                    .enroll(&spec.id, secret)
                    .map_err(|err| identity_error(&spec.id, "enrollment", err))?;
                let admin = Identity {
                    id: spec.id.clone(),
                    affiliation: spec.affiliation.clone(),
                    msp_id: spec.msp_id.clone(),
                    enrollment,
                };
                self.persist(&admin)?;
                info!("[identity] '{}' enrolled", spec.id);
                admin
            }
        };
        *registrar = Some(admin.clone());
        Ok(admin)
    }

    /// Get a user identity, registering and enrolling it only if no record
    /// exists. The admin acts as registrar.
    pub fn ensure_user(&self, spec: &UserSpec) -> Result<Identity> {
        if spec.id == self.admin.id {
            return self.ensure_admin();
        }
        if let Some(user) = self.load(&spec.id)? {
            debug!("[identity] '{}' loaded from disk", spec.id);
            return Ok(user);
        }
        let registrar = self.ensure_admin()?;
        let request = RegistrationRequest {
            id: spec.id.clone(),
            affiliation: spec.affiliation.clone(),
            secret: spec.secret.clone(),
        };
        let secret = self
            .ca
            .register(&request, &registrar)
            .map_err(|err| identity_error(&spec.id, "registration", err))?;
        let enrollment = self
            .ca
            .enroll(&spec.id, &secret)
            .map_err(|err| identity_error(&spec.id, "enrollment", err))?;
        let user = Identity {
            id: spec.id.clone(),
            affiliation: spec.affiliation.clone(),
            msp_id: spec.msp_id.clone(),
            enrollment,
        };
        self.persist(&user)?;
        info!("[identity] '{}' registered and enrolled", spec.id);
        Ok(user)
    }

    /// Startup sequence: the admin first, then every user in order.
    /// Stops at the first failure.
    pub fn enroll_all<'a, I>(&self, users: I) -> Result<(Identity, Vec<Identity>)>
    where
        I: IntoIterator<Item = &'a UserSpec>,
    {
        let admin = self.ensure_admin()?;
        let users = users
            .into_iter()
            .map(|spec| self.ensure_user(spec))
            .collect::<Result<Vec<_>>>()?;
        Ok((admin, users))
    }

    /// Load the persisted identity for `id`, if any.
    pub fn load(&self, id: &str) -> Result<Option<Identity>> {
        let path = self.record_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let buf = fs::read(&path).map_err(|err| Error::new_ext(ErrorKind::StorageFault, err))?;
        let record = IdentityRecord::decode(&buf)?;
        if record.identity.id != id {
            return Err(Error::new_ext(
                ErrorKind::MalformedData,
                format!("record for '{}' holds '{}'", id, record.identity.id),
            ));
        }
        Ok(Some(record.identity))
    }

    /// Persist `identity`, replacing any previous record atomically.
    fn persist(&self, identity: &Identity) -> Result<()> {
        let path = self.record_path(&identity.id)?;
        let buf = IdentityRecord::new(identity.clone()).encode()?;
        let tmp = path.with_extension(format!("{}.tmp", RECORD_EXT));
        fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(&tmp, &buf))
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|err| {
                let _ = fs::remove_file(&tmp);
                Error::new_ext(ErrorKind::StorageFault, err)
            })
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        let forbidden = |c: char| c == '/' || c == '\\' || c == '\0';
        if id.is_empty() || id == "." || id == ".." || id.contains(forbidden) {
            return Err(Error::new_ext(
                ErrorKind::MalformedData,
                format!("invalid identity id '{}'", id),
            ));
        }
        Ok(self.dir.join(format!("{}.{}", id, RECORD_EXT)))
    }
}

fn identity_error(id: &str, stage: &str, err: Error) -> Error {
    error!("[identity] '{}' {} failed: {}", id, stage, err.to_string_full());
    match err.kind {
        ErrorKind::IdentityFault => err,
        _ => Error::new_ext(
            ErrorKind::IdentityFault,
            format!("{} of '{}': {}", stage, id, err.to_string_full()),
        ),
    }
}
