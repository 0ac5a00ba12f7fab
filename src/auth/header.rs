// src/auth/header.rs

//! HTTP framing for Negotiate tokens (RFC 4559).
//!
//! Clients send `Authorization: Negotiate <base64>` (or `NTLM <base64>`); the
//! server answers `401` with `WWW-Authenticate: Negotiate` to start, and with
//! `WWW-Authenticate: Negotiate <base64>` to continue or complete a handshake.

use base64::Engine as _;
use http::{HeaderMap, HeaderValue};

const NTLMSSP_SIGNATURE: &[u8] = b"NTLMSSP\0";

/// An HTTP authentication scheme carrying SSPI tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Negotiate,
    Ntlm,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Negotiate => "Negotiate",
            Scheme::Ntlm => "NTLM",
        }
    }

    /// The security package that accepts this scheme's tokens.
    pub fn security_package(&self) -> &'static str {
        self.as_str()
    }

    fn parse(value: &str) -> Option<(Scheme, &str)> {
        let (scheme, rest) = match value.split_once(' ') {
            Some((scheme, rest)) => (scheme, rest.trim()),
            None => (value, ""),
        };

        if scheme.eq_ignore_ascii_case("negotiate") {
            Some((Scheme::Negotiate, rest))
        } else if scheme.eq_ignore_ascii_case("ntlm") {
            Some((Scheme::Ntlm, rest))
        } else {
            None
        }
    }
}

/// Extract the client token from the `Authorization` header.
///
/// Returns `Ok(None)` when the request carries no Negotiate or NTLM
/// authorization at all.
///
/// # Errors
///
/// A Negotiate or NTLM header without a token, or with a token that is not
/// valid base64, is an invalid-token error.
pub fn parse_authorization(headers: &HeaderMap) -> crate::Result<Option<(Scheme, Vec<u8>)>> {
    for value in headers.get_all(http::header::AUTHORIZATION) {
        let value = match value.to_str() {
            Ok(value) => value.trim(),
            Err(_) => continue,
        };

        if let Some((scheme, token)) = Scheme::parse(value) {
            if token.is_empty() {
                return Err(crate::error::invalid_token());
            }
            let token = base64::engine::general_purpose::STANDARD
                .decode(token)
                .map_err(crate::error::malformed_token)?;
            return Ok(Some((scheme, token)));
        }
    }

    Ok(None)
}

/// `WWW-Authenticate` value for `scheme`, with `token` if one must be sent.
pub fn challenge(scheme: Scheme, token: Option<&[u8]>) -> HeaderValue {
    match token {
        Some(token) if !token.is_empty() => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(token);
            // base64 is always a valid header value
            HeaderValue::from_str(&format!("{} {}", scheme.as_str(), encoded))
                .unwrap_or_else(|_| HeaderValue::from_static(scheme.as_str()))
        }
        _ => HeaderValue::from_static(scheme.as_str()),
    }
}

/// Add the bare `Negotiate` and `NTLM` challenges of an initial `401`.
pub fn append_challenges(headers: &mut HeaderMap) {
    for scheme in [Scheme::Negotiate, Scheme::Ntlm] {
        headers.append(http::header::WWW_AUTHENTICATE, challenge(scheme, None));
    }
}

/// True if `token` is a raw NTLMSSP message rather than SPNEGO.
///
/// Browsers fall back to sending NTLM inside `Negotiate` when Kerberos is
/// unavailable.
pub fn is_ntlm_token(token: &[u8]) -> bool {
    token.starts_with(NTLMSSP_SIGNATURE)
}
