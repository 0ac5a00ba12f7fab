#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # negotiate-provider
//!
//! Server-side driver for the HTTP "Negotiate" family of authentication schemes
//! (Kerberos, SPNEGO, NTLM) on top of a platform security provider.
//!
//! The cryptography lives in the platform (SSPI on Windows). This crate tracks
//! the per-connection handshake state between rounds, turns native status codes
//! into a [`Negotiation`] outcome, and guarantees that every native context and
//! credential handle is released exactly once.
//!
//! ```rust,ignore
//! use negotiate_provider::{Negotiation, NegotiateProvider};
//!
//! let provider = NegotiateProvider::new(std::sync::Arc::new(WindowsProvider::new()));
//!
//! match provider.accept_security_token("10.0.0.7:51234", &client_token, "Negotiate")? {
//!     Negotiation::Continue { token } => { /* 401 + WWW-Authenticate: Negotiate <token> */ }
//!     Negotiation::Complete { context, .. } => {
//!         let identity = context.identity()?;
//!         println!("hello {}", identity.fqn());
//!     }
//! }
//! ```
//!
//! ## Optional Features
//!
//! - **windows-sspi**: Provides [`auth::windows::WindowsProvider`], the native
//!   Secur32/Advapi32/Netapi32 implementation of [`SecurityProvider`].

pub use http::header;

pub use self::auth::lookup::{
    Account, Computer, Domain, Identity, JoinStatus, LogonProvider, LogonType, TrustDirection,
    TrustType,
};
pub use self::auth::negotiate::{Negotiation, NegotiateProvider, NegotiateProviderBuilder};
pub use self::auth::sspi::{
    AcceptOutput, CredentialsHandle, RawHandle, SecurityContext, SecurityProvider, SecurityStatus,
};
pub use self::auth::store::ContextStore;
pub use self::auth::NegotiateConfig;
pub use self::error::{Error, Result};

pub mod auth;
mod error;
