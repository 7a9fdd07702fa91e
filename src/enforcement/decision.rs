// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorization decision as a total function of fingerprint and token read.

use crate::authority::AuthorityService;
use crate::models::{AuthorizationDecision, Fingerprint, IndeterminateReason};
use crate::storage::TokenRead;

/// Decide a device's authorization. Only an exact token match authorizes.
pub fn decide(
    authority: &AuthorityService,
    fingerprint: Option<&Fingerprint>,
    token: &TokenRead,
) -> AuthorizationDecision {
    let Some(fingerprint) = fingerprint else {
        return AuthorizationDecision::Indeterminate(IndeterminateReason::NoFingerprint);
    };

    match token {
        TokenRead::Present(token) => {
            if authority.verify(Some(fingerprint), token.as_str()) {
                AuthorizationDecision::Authorized
            } else {
                AuthorizationDecision::Unauthorized
            }
        }
        TokenRead::Absent => AuthorizationDecision::Indeterminate(IndeterminateReason::TokenAbsent),
        TokenRead::Corrupt => AuthorizationDecision::Indeterminate(IndeterminateReason::TokenCorrupt),
        TokenRead::Io(e) => {
            AuthorizationDecision::Indeterminate(IndeterminateReason::TokenIo(e.to_string()))
        }
    }
}
