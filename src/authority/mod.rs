// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Device Authority
//!
//! Issues and verifies device-bound authorization tokens.
//!
//! A token is `hex(HMAC-SHA256(secret, fingerprint))`, lowercase. It is a pure
//! function of secret and fingerprint: no nonce, no timestamp. The same bytes
//! are written to the token artifact, so any implementation using the same
//! secret verifies tokens issued by any other.
//!
//! ## Known limitation
//!
//! Authorization is per fingerprint, not per physical device. A token file
//! copied onto another device reporting the same serial verifies there too.

mod fingerprint;
mod secret;

pub use fingerprint::fingerprint;
pub use secret::SharedSecret;

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AuthorityError;
use crate::models::{Fingerprint, Token};

type HmacSha256 = Hmac<Sha256>;

/// Token issuer and verifier holding the process-wide secret.
#[derive(Clone)]
pub struct AuthorityService {
    keyed: HmacSha256,
}

impl AuthorityService {
    pub fn new(secret: &SharedSecret) -> Self {
        // HMAC accepts keys of any length; oversized keys are hashed first.
        let keyed = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
        };
        Self { keyed }
    }

    /// Issue the token for a fingerprint.
    pub fn issue(&self, fingerprint: Option<&Fingerprint>) -> Result<Token, AuthorityError> {
        let fingerprint = fingerprint.ok_or(AuthorityError::InvalidFingerprint)?;
        Ok(Token::new(self.digest_hex(fingerprint)))
    }

    /// Check a presented token against the one this service would issue.
    ///
    /// Never fails: a missing fingerprint or a malformed token is simply `false`.
    pub fn verify(&self, fingerprint: Option<&Fingerprint>, presented: &str) -> bool {
        let Some(fingerprint) = fingerprint else {
            return false;
        };
        if presented.is_empty() {
            return false;
        }
        let expected = self.digest_hex(fingerprint);
        expected.as_bytes().ct_eq(presented.as_bytes()).into()
    }

    fn digest_hex(&self, fingerprint: &Fingerprint) -> String {
        let mut mac = self.keyed.clone();
        mac.update(fingerprint.as_str().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl fmt::Debug for AuthorityService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityService").finish_non_exhaustive()
    }
}
