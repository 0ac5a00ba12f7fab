// src/auth/sspi.rs

//! SSPI (Security Support Provider Interface) boundary.
//!
//! The platform security provider is consumed through [`SecurityProvider`]. Every
//! native handle it hands out is wrapped in an owning type here that releases it
//! exactly once, on drop:
//!
//! - [`CredentialsHandle`]: inbound server credentials, one per negotiation round.
//! - [`SecurityContext`]: the negotiated context, pending or complete.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::lookup::{Account, Domain, Identity, JoinStatus, LogonProvider, LogonType};

/// `ASC_REQ_CONNECTION`, the context requirement used for HTTP style negotiation.
pub const ASC_REQ_CONNECTION: u32 = 0x0000_0800;

/// A native handle: the two pointer-sized words of an SSPI `SecHandle`.
///
/// Plain kernel handles (such as logon tokens) use `lower` and leave `upper` zero.
/// A `RawHandle` carries no ownership; the owning wrappers in this module do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RawHandle {
    pub lower: usize,
    pub upper: usize,
}

impl RawHandle {
    /// The null handle. Never released.
    pub const NULL: RawHandle = RawHandle { lower: 0, upper: 0 };

    pub const fn new(lower: usize, upper: usize) -> RawHandle {
        RawHandle { lower, upper }
    }

    pub fn is_null(&self) -> bool {
        *self == RawHandle::NULL
    }
}

/// Status returned by a native security call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SecurityStatus {
    /// `SEC_E_OK`
    Ok,
    /// `SEC_I_CONTINUE_NEEDED`
    ContinueNeeded,
    /// Anything else. Always a failure for the negotiation engine.
    Other(i32),
}

impl SecurityStatus {
    pub const SEC_E_OK: i32 = 0;
    pub const SEC_I_CONTINUE_NEEDED: i32 = 0x0009_0312;
    pub const SEC_E_INVALID_TOKEN: i32 = 0x8009_0308_u32 as i32;
    pub const SEC_E_LOGON_DENIED: i32 = 0x8009_030C_u32 as i32;
    pub const SEC_E_INTERNAL_ERROR: i32 = 0x8009_0304_u32 as i32;

    pub fn from_code(code: i32) -> SecurityStatus {
        match code {
            SecurityStatus::SEC_E_OK => SecurityStatus::Ok,
            SecurityStatus::SEC_I_CONTINUE_NEEDED => SecurityStatus::ContinueNeeded,
            other => SecurityStatus::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            SecurityStatus::Ok => SecurityStatus::SEC_E_OK,
            SecurityStatus::ContinueNeeded => SecurityStatus::SEC_I_CONTINUE_NEEDED,
            SecurityStatus::Other(code) => code,
        }
    }
}

impl fmt::Display for SecurityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.code() as u32)
    }
}

/// What the native accept primitive produced for one round.
#[derive(Clone, Debug)]
pub struct AcceptOutput {
    pub status: SecurityStatus,
    /// The new (or updated in place) context. Null if the provider created none.
    pub context: RawHandle,
    /// Output token for the client. Empty if none was produced.
    pub token: Vec<u8>,
}

/// The platform's native security primitives.
///
/// Calls are synchronous and may block on a round-trip to the security provider
/// or a domain controller. Implementations must be callable from many threads.
pub trait SecurityProvider: Send + Sync + 'static {
    /// Acquire inbound server credentials for `package`.
    fn acquire_credentials_handle(&self, package: &str) -> Result<RawHandle, SecurityStatus>;

    fn free_credentials_handle(&self, credentials: RawHandle);

    /// One `AcceptSecurityContext` round.
    ///
    /// `context` is the pending context from the previous round, if any. The
    /// provider may return that same handle, updated in place.
    fn accept_security_context(
        &self,
        credentials: RawHandle,
        context: Option<RawHandle>,
        token: &[u8],
        requirements: u32,
    ) -> AcceptOutput;

    fn delete_security_context(&self, context: RawHandle);

    /// Access token of the client behind a completed context.
    fn query_context_token(&self, context: RawHandle) -> Result<RawHandle, SecurityStatus>;

    fn close_token(&self, token: RawHandle);

    /// The user account and group memberships carried by an access token.
    fn token_accounts(&self, token: RawHandle) -> Result<(Account, Vec<Account>), SecurityStatus>;

    /// `LogonUser`. Returns an access token.
    fn logon_user(
        &self,
        username: &str,
        domain: Option<&str>,
        password: &str,
        logon_type: LogonType,
        logon_provider: LogonProvider,
    ) -> Result<RawHandle, SecurityStatus>;

    fn lookup_account(&self, username: &str) -> Result<Account, SecurityStatus>;

    fn domain_trusts(&self) -> Result<Vec<Domain>, SecurityStatus>;

    fn computer_name(&self) -> Result<String, SecurityStatus>;

    /// Join status of `computer_name` and the workgroup or domain it belongs to.
    fn join_information(&self, computer_name: &str) -> Result<(JoinStatus, String), SecurityStatus>;
}

/// Inbound server credentials, freed on drop.
pub struct CredentialsHandle {
    provider: Arc<dyn SecurityProvider>,
    handle: RawHandle,
    package: String,
}

impl CredentialsHandle {
    pub fn acquire(provider: &Arc<dyn SecurityProvider>, package: &str) -> crate::Result<Self> {
        let handle = provider
            .acquire_credentials_handle(package)
            .map_err(crate::error::native)?;

        Ok(CredentialsHandle {
            provider: Arc::clone(provider),
            handle,
            package: package.to_owned(),
        })
    }

    pub fn raw(&self) -> RawHandle {
        self.handle
    }

    pub fn package(&self) -> &str {
        &self.package
    }
}

impl Drop for CredentialsHandle {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            self.provider.free_credentials_handle(self.handle);
        }
    }
}

impl fmt::Debug for CredentialsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsHandle")
            .field("handle", &self.handle)
            .field("package", &self.package)
            .finish()
    }
}

/// A native security context, deleted on drop.
///
/// Owned by exactly one place at a time: the context store while the handshake
/// is pending, or the caller once it is complete.
pub struct SecurityContext {
    provider: Arc<dyn SecurityProvider>,
    handle: RawHandle,
    package: String,
    token: Option<Bytes>,
    continue_needed: bool,
}

impl SecurityContext {
    pub(crate) fn new(provider: Arc<dyn SecurityProvider>, handle: RawHandle, package: &str) -> Self {
        SecurityContext {
            provider,
            handle,
            package: package.to_owned(),
            token: None,
            continue_needed: false,
        }
    }

    pub(crate) fn with_token(mut self, token: Option<Bytes>, continue_needed: bool) -> Self {
        self.token = token;
        self.continue_needed = continue_needed;
        self
    }

    /// Give up ownership of the native handle without releasing it.
    pub(crate) fn into_raw(mut self) -> RawHandle {
        std::mem::replace(&mut self.handle, RawHandle::NULL)
    }

    pub fn raw(&self) -> RawHandle {
        self.handle
    }

    pub fn security_package(&self) -> &str {
        &self.package
    }

    /// Output token to forward to the client, if the provider produced one.
    pub fn token(&self) -> Option<&Bytes> {
        self.token.as_ref()
    }

    /// True while more handshake rounds are needed.
    pub fn is_continue(&self) -> bool {
        self.continue_needed
    }

    /// The authenticated client behind this context.
    pub fn identity(&self) -> crate::Result<Identity> {
        let token = self
            .provider
            .query_context_token(self.handle)
            .map_err(crate::error::native)?;
        Identity::from_token(&self.provider, token)
    }
}

impl Drop for SecurityContext {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            log::trace!("deleting {} security context {:?}", self.package, self.handle);
            self.provider.delete_security_context(self.handle);
        }
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("handle", &self.handle)
            .field("package", &self.package)
            .field("token_len", &self.token.as_ref().map(Bytes::len))
            .field("continue", &self.continue_needed)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records releases so tests can check every handle is freed once.
    #[derive(Default)]
    pub(crate) struct Recorder {
        next: AtomicUsize,
        pub(crate) deleted: Mutex<Vec<RawHandle>>,
        pub(crate) freed: Mutex<Vec<RawHandle>>,
        pub(crate) closed: Mutex<Vec<RawHandle>>,
        pub(crate) script: Mutex<Vec<SecurityStatus>>,
    }

    impl Recorder {
        pub(crate) fn script(statuses: &[SecurityStatus]) -> Arc<Recorder> {
            let recorder = Recorder::default();
            *recorder.script.lock().unwrap() = statuses.iter().rev().copied().collect();
            Arc::new(recorder)
        }

        fn fresh(&self) -> RawHandle {
            RawHandle::new(self.next.fetch_add(1, Ordering::SeqCst) + 1, 0x5ec)
        }
    }

    impl SecurityProvider for Recorder {
        fn acquire_credentials_handle(&self, _package: &str) -> Result<RawHandle, SecurityStatus> {
            Ok(self.fresh())
        }

        fn free_credentials_handle(&self, credentials: RawHandle) {
            self.freed.lock().unwrap().push(credentials);
        }

        fn accept_security_context(
            &self,
            _credentials: RawHandle,
            context: Option<RawHandle>,
            token: &[u8],
            _requirements: u32,
        ) -> AcceptOutput {
            let status = self.script.lock().unwrap().pop().unwrap_or(SecurityStatus::Ok);
            AcceptOutput {
                status,
                context: context.unwrap_or_else(|| self.fresh()),
                token: token.iter().rev().copied().collect(),
            }
        }

        fn delete_security_context(&self, context: RawHandle) {
            self.deleted.lock().unwrap().push(context);
        }

        fn query_context_token(&self, context: RawHandle) -> Result<RawHandle, SecurityStatus> {
            Ok(RawHandle::new(context.lower, 0))
        }

        fn close_token(&self, token: RawHandle) {
            self.closed.lock().unwrap().push(token);
        }

        fn token_accounts(&self, _token: RawHandle) -> Result<(Account, Vec<Account>), SecurityStatus> {
            Ok((
                Account::new("alice", "CORP", "S-1-5-21-1-2-3-1104"),
                vec![Account::new("Domain Users", "CORP", "S-1-5-21-1-2-3-513")],
            ))
        }

        fn logon_user(
            &self,
            _username: &str,
            _domain: Option<&str>,
            _password: &str,
            _logon_type: LogonType,
            _logon_provider: LogonProvider,
        ) -> Result<RawHandle, SecurityStatus> {
            Ok(self.fresh())
        }

        fn lookup_account(&self, username: &str) -> Result<Account, SecurityStatus> {
            Ok(Account::new(username, "CORP", "S-1-5-21-1-2-3-1000"))
        }

        fn domain_trusts(&self) -> Result<Vec<Domain>, SecurityStatus> {
            Ok(Vec::new())
        }

        fn computer_name(&self) -> Result<String, SecurityStatus> {
            Ok("WEB01".into())
        }

        fn join_information(&self, _computer_name: &str) -> Result<(JoinStatus, String), SecurityStatus> {
            Ok((JoinStatus::Domain, "CORP".into()))
        }
    }
}
