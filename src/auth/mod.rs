// src/auth/mod.rs

//! Server-side Negotiate (Kerberos/SPNEGO/NTLM) authentication.
//!
//! [`negotiate::NegotiateProvider`] drives one handshake round per call against a
//! platform [`sspi::SecurityProvider`], keeping pending contexts in a
//! [`store::ContextStore`] between rounds.

use std::time::Duration;

pub mod header;
pub mod lookup;
pub mod negotiate;
pub mod sspi;
pub mod store;

#[cfg(all(windows, feature = "windows-sspi"))]
#[cfg_attr(docsrs, doc(cfg(all(windows, feature = "windows-sspi"))))]
pub mod windows;

/// Configuration for the negotiation engine.
#[derive(Clone, Debug)]
pub struct NegotiateConfig {
    pub(crate) context_ttl: Duration,
    pub(crate) sweep_interval: Duration,
    pub(crate) context_requirements: u32,
    pub(crate) background_sweep: bool,
}

impl Default for NegotiateConfig {
    fn default() -> Self {
        NegotiateConfig {
            context_ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            context_requirements: sspi::ASC_REQ_CONNECTION,
            background_sweep: true,
        }
    }
}

impl NegotiateConfig {
    /// Default configuration with a continuation-context TTL of `secs` seconds.
    pub fn with_ttl_secs(secs: u64) -> Self {
        NegotiateConfig {
            context_ttl: Duration::from_secs(secs),
            ..NegotiateConfig::default()
        }
    }

    /// How long a pending context may sit idle between rounds.
    pub fn context_ttl(&self) -> Duration {
        self.context_ttl
    }

    /// How often the background sweeper looks for idle contexts.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// `ASC_REQ_*` flags passed to every accept call.
    pub fn context_requirements(&self) -> u32 {
        self.context_requirements
    }

    pub fn background_sweep(&self) -> bool {
        self.background_sweep
    }
}
