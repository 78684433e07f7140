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

//! Endorsement validation policy.
//!
//! A response counts only when it is cryptographically verified and reports
//! a successful chaincode execution. Sets are judged unanimously: a single
//! failing response fails the whole set.

use crate::{base::EndorsementResponse, Error, ErrorKind, Result};

/// True if the set is not empty and every response is valid.
pub fn all_valid(responses: &[EndorsementResponse]) -> bool {
    !responses.is_empty() && responses.iter().all(EndorsementResponse::is_valid)
}

/// First valid response of the set.
///
/// # Errors
///
/// `ResourceNotFound` if no peer produced a usable answer.
pub fn first_successful(responses: &[EndorsementResponse]) -> Result<&EndorsementResponse> {
    responses.iter().find(|r| r.is_valid()).ok_or_else(|| {
        Error::new_ext(
            ErrorKind::ResourceNotFound,
            format!("no successful response out of {}", responses.len()),
        )
    })
}

/// Responses failing the validity criterion.
pub fn invalid_responses(responses: &[EndorsementResponse]) -> Vec<&EndorsementResponse> {
    responses.iter().filter(|r| !r.is_valid()).collect()
}
