// src/auth/negotiate.rs

//! Server side of the Negotiate handshake.
//!
//! Each call to [`NegotiateProvider::accept_security_token`] is one round: the
//! client's token goes to the platform's accept primitive together with the
//! context left over from the previous round for that connection, and the
//! native status decides the outcome:
//!
//! - `SEC_E_OK`: the handshake is complete, the caller gets the context.
//! - `SEC_I_CONTINUE_NEEDED`: the context is parked in the store and the caller
//!   gets a token to send back to the client.
//! - anything else: all contexts for the connection are released and the
//!   status is returned as an error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;

use super::lookup::{self, Account, Computer, Domain, Identity, LogonProvider, LogonType};
use super::sspi::{CredentialsHandle, SecurityContext, SecurityProvider, SecurityStatus};
use super::store::ContextStore;
use super::NegotiateConfig;

/// The result of one successful handshake round.
#[derive(Debug)]
pub enum Negotiation {
    /// The client is authenticated. `token`, if present, must still be sent to
    /// the client (mutual authentication).
    Complete {
        context: SecurityContext,
        token: Option<Bytes>,
    },
    /// Send `token` to the client and wait for its next token.
    Continue { token: Bytes },
}

impl Negotiation {
    pub fn is_complete(&self) -> bool {
        matches!(self, Negotiation::Complete { .. })
    }

    /// The token to send back to the client, if any.
    pub fn token(&self) -> Option<&Bytes> {
        match self {
            Negotiation::Complete { token, .. } => token.as_ref(),
            Negotiation::Continue { token } => Some(token),
        }
    }

    /// The completed context, if the handshake finished.
    pub fn into_context(self) -> Option<SecurityContext> {
        match self {
            Negotiation::Complete { context, .. } => Some(context),
            Negotiation::Continue { .. } => None,
        }
    }
}

/// Accepts Negotiate tokens from many connections at once.
///
/// Cloning is cheap; clones share the same context store.
#[derive(Clone)]
pub struct NegotiateProvider {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn SecurityProvider>,
    contexts: ContextStore,
    config: NegotiateConfig,
    sweeper: Option<JoinHandle<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// A `NegotiateProviderBuilder` can be used to create a `NegotiateProvider`
/// with custom configuration.
#[must_use]
#[derive(Debug, Default)]
pub struct NegotiateProviderBuilder {
    config: NegotiateConfig,
}

impl NegotiateProviderBuilder {
    pub fn new() -> Self {
        NegotiateProviderBuilder::default()
    }

    pub fn config(mut self, config: NegotiateConfig) -> Self {
        self.config = config;
        self
    }

    /// How long a pending context may sit idle between rounds. Default 30s.
    pub fn context_ttl(mut self, ttl: Duration) -> Self {
        self.config.context_ttl = ttl;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// `ASC_REQ_*` flags for every accept call. Default `ASC_REQ_CONNECTION`.
    pub fn context_requirements(mut self, flags: u32) -> Self {
        self.config.context_requirements = flags;
        self
    }

    /// Sweep idle contexts from a background task. Only takes effect when
    /// `build` runs inside a Tokio runtime; otherwise contexts expire when
    /// their connection id is next used.
    pub fn background_sweep(mut self, enabled: bool) -> Self {
        self.config.background_sweep = enabled;
        self
    }

    pub fn build(self, provider: Arc<dyn SecurityProvider>) -> NegotiateProvider {
        let config = self.config;
        let contexts = ContextStore::new(config.context_ttl);

        let sweeper = if config.background_sweep {
            match tokio::runtime::Handle::try_current() {
                Ok(_) => Some(contexts.spawn_sweeper(config.sweep_interval)),
                Err(_) => {
                    log::debug!("no Tokio runtime, negotiate contexts expire on access only");
                    None
                }
            }
        } else {
            None
        };

        NegotiateProvider {
            inner: Arc::new(Inner {
                provider,
                contexts,
                config,
                sweeper,
            }),
        }
    }
}

impl NegotiateProvider {
    /// A provider with the default configuration.
    pub fn new(provider: Arc<dyn SecurityProvider>) -> NegotiateProvider {
        NegotiateProviderBuilder::new().build(provider)
    }

    pub fn builder() -> NegotiateProviderBuilder {
        NegotiateProviderBuilder::new()
    }

    pub fn config(&self) -> &NegotiateConfig {
        &self.inner.config
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.inner.contexts
    }

    /// Number of handshakes waiting for their next client token.
    pub fn continue_contexts_len(&self) -> usize {
        self.inner.contexts.len()
    }

    /// Run one handshake round for `connection_id`.
    ///
    /// Blocks on the platform provider. From async code use
    /// [`accept_security_token_async`](NegotiateProvider::accept_security_token_async).
    ///
    /// # Errors
    ///
    /// An empty `token` abandons any pending handshake for the connection and
    /// fails with an invalid-token error. Any native status other than
    /// complete or continue fails with that status; the connection is left
    /// with no pending context, so the next round starts fresh.
    pub fn accept_security_token(
        &self,
        connection_id: &str,
        token: &[u8],
        security_package: &str,
    ) -> crate::Result<Negotiation> {
        let inner = &*self.inner;

        if token.is_empty() {
            drop(inner.contexts.remove(connection_id));
            log::debug!("empty {} token from {:?}", security_package, connection_id);
            return Err(crate::error::invalid_token());
        }

        // taken before acquiring credentials, so any failure releases it
        let mut slot = inner.contexts.lock(connection_id);
        let previous = slot.take();

        let credentials = CredentialsHandle::acquire(&inner.provider, security_package)?;

        let output = inner.provider.accept_security_context(
            credentials.raw(),
            previous.as_ref().map(SecurityContext::raw),
            token,
            inner.config.context_requirements,
        );

        // an in-place update hands back the handle that was passed in
        let previous = previous.and_then(|previous| {
            if previous.raw() == output.context {
                previous.into_raw();
                None
            } else {
                Some(previous)
            }
        });
        let context = SecurityContext::new(Arc::clone(&inner.provider), output.context, security_package);

        match output.status {
            SecurityStatus::Ok => {
                drop(previous);
                let token = if output.token.is_empty() {
                    None
                } else {
                    Some(Bytes::from(output.token))
                };
                log::debug!(
                    "{} handshake for {:?} complete",
                    security_package,
                    connection_id
                );
                Ok(Negotiation::Complete {
                    context: context.with_token(token.clone(), false),
                    token,
                })
            }
            SecurityStatus::ContinueNeeded => {
                drop(previous);
                let token = Bytes::from(output.token);
                log::debug!(
                    "{} handshake for {:?} continues, {} byte challenge",
                    security_package,
                    connection_id,
                    token.len()
                );
                slot.put(context.with_token(Some(token.clone()), true));
                Ok(Negotiation::Continue { token })
            }
            status @ SecurityStatus::Other(_) => {
                drop(context);
                drop(previous);
                log::warn!(
                    "{} handshake for {:?} failed: {}",
                    security_package,
                    connection_id,
                    status
                );
                Err(crate::error::native(status))
            }
        }
    }

    /// [`accept_security_token`](NegotiateProvider::accept_security_token) on
    /// Tokio's blocking pool.
    pub async fn accept_security_token_async(
        &self,
        connection_id: String,
        token: Vec<u8>,
        security_package: String,
    ) -> crate::Result<Negotiation> {
        let this = self.clone();
        blocking(move || this.accept_security_token(&connection_id, &token, &security_package)).await
    }

    /// Abandon the pending handshake for `connection_id`, if any.
    pub fn reset_security_token(&self, connection_id: &str) {
        if let Some(context) = self.inner.contexts.remove(connection_id) {
            log::debug!("reset {} handshake for {:?}", context.security_package(), connection_id);
        }
    }

    pub fn current_computer(&self) -> crate::Result<Computer> {
        let provider = &self.inner.provider;
        let name = provider
            .computer_name()
            .map_err(crate::error::unresolved_host)?;
        let (join_status, member_of) = provider
            .join_information(&name)
            .map_err(crate::error::native)?;
        Ok(Computer::new(name, join_status, member_of))
    }

    pub fn domains(&self) -> crate::Result<Vec<Domain>> {
        self.inner
            .provider
            .domain_trusts()
            .map_err(crate::error::native)
    }

    /// Log on with `DOMAIN\user` or `user` (or a UPN) and a password, as a
    /// network logon with the default provider.
    pub fn logon_user(&self, username: &str, password: &str) -> crate::Result<Identity> {
        let (domain, username) = lookup::split_domain_user(username);
        self.logon_domain_user(
            username,
            domain,
            password,
            LogonType::Network,
            LogonProvider::Default,
        )
    }

    pub fn logon_domain_user(
        &self,
        username: &str,
        domain: Option<&str>,
        password: &str,
        logon_type: LogonType,
        logon_provider: LogonProvider,
    ) -> crate::Result<Identity> {
        let provider = &self.inner.provider;
        let token = provider
            .logon_user(username, domain, password, logon_type, logon_provider)
            .map_err(|status| {
                log::debug!("logon for {:?} failed: {}", username, status);
                crate::error::native(status)
            })?;
        Identity::from_token(provider, token)
    }

    /// [`logon_user`](NegotiateProvider::logon_user) on Tokio's blocking pool.
    pub async fn logon_user_async(&self, username: String, password: String) -> crate::Result<Identity> {
        let this = self.clone();
        blocking(move || this.logon_user(&username, &password)).await
    }

    pub fn lookup_account(&self, username: &str) -> crate::Result<Account> {
        self.inner
            .provider
            .lookup_account(username)
            .map_err(crate::error::native)
    }
}

impl fmt::Debug for NegotiateProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiateProvider")
            .field("config", &self.inner.config)
            .field("contexts", &self.inner.contexts)
            .finish()
    }
}

async fn blocking<F, T>(f: F) -> crate::Result<T>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(crate::error::runtime(err)),
    }
}
