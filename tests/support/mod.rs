#![allow(dead_code)]

//! A scripted in-memory `SecurityProvider`.
//!
//! The client token's leading bytes choose the native status of a round:
//! `ok...` completes, `continue...` asks for another round, `fail...` returns
//! `SEC_E_LOGON_DENIED`. The output token echoes the input with a `srv:` prefix.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use negotiate_provider::{
    AcceptOutput, Account, Domain, JoinStatus, LogonProvider, LogonType, RawHandle,
    SecurityProvider, SecurityStatus,
};

pub const LOGON_DENIED: SecurityStatus = SecurityStatus::Other(SecurityStatus::SEC_E_LOGON_DENIED);

#[derive(Default)]
pub struct FakeProvider {
    next: AtomicUsize,
    /// Continue rounds reuse the handle they were given, like SSPI does.
    pub in_place: bool,
    pub live_contexts: Mutex<HashSet<RawHandle>>,
    pub live_credentials: Mutex<HashSet<RawHandle>>,
    pub live_tokens: Mutex<HashSet<RawHandle>>,
    pub double_releases: AtomicUsize,
    pub accepted: Mutex<Vec<(Option<RawHandle>, Vec<u8>)>>,
    pub logons: Mutex<Vec<(String, Option<String>, LogonType, LogonProvider)>>,
    pub computer: Mutex<Option<String>>,
}

impl FakeProvider {
    pub fn new() -> Arc<FakeProvider> {
        Arc::new(FakeProvider {
            computer: Mutex::new(Some("web01.corp.example".into())),
            ..FakeProvider::default()
        })
    }

    pub fn in_place() -> Arc<FakeProvider> {
        Arc::new(FakeProvider {
            in_place: true,
            computer: Mutex::new(Some("web01.corp.example".into())),
            ..FakeProvider::default()
        })
    }

    fn fresh(&self) -> RawHandle {
        RawHandle::new(self.next.fetch_add(1, Ordering::SeqCst) + 1, 0xacc)
    }

    fn release(&self, set: &Mutex<HashSet<RawHandle>>, handle: RawHandle) {
        if !set.lock().unwrap().remove(&handle) {
            self.double_releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn live_contexts(&self) -> usize {
        self.live_contexts.lock().unwrap().len()
    }

    pub fn live_credentials(&self) -> usize {
        self.live_credentials.lock().unwrap().len()
    }

    pub fn live_tokens(&self) -> usize {
        self.live_tokens.lock().unwrap().len()
    }

    pub fn double_releases(&self) -> usize {
        self.double_releases.load(Ordering::SeqCst)
    }
}

impl SecurityProvider for FakeProvider {
    fn acquire_credentials_handle(&self, package: &str) -> Result<RawHandle, SecurityStatus> {
        if package == "Bogus" {
            return Err(SecurityStatus::Other(0x8009_0305_u32 as i32));
        }
        let handle = self.fresh();
        self.live_credentials.lock().unwrap().insert(handle);
        Ok(handle)
    }

    fn free_credentials_handle(&self, credentials: RawHandle) {
        self.release(&self.live_credentials, credentials);
    }

    fn accept_security_context(
        &self,
        _credentials: RawHandle,
        context: Option<RawHandle>,
        token: &[u8],
        _requirements: u32,
    ) -> AcceptOutput {
        self.accepted.lock().unwrap().push((context, token.to_vec()));

        let status = if token.starts_with(b"ok") {
            SecurityStatus::Ok
        } else if token.starts_with(b"continue") {
            SecurityStatus::ContinueNeeded
        } else {
            LOGON_DENIED
        };

        let handle = match context {
            Some(previous) if self.in_place => previous,
            _ => {
                let handle = self.fresh();
                self.live_contexts.lock().unwrap().insert(handle);
                handle
            }
        };

        let mut output = b"srv:".to_vec();
        output.extend_from_slice(token);
        if token.ends_with(b"-silent") {
            output.clear();
        }

        AcceptOutput {
            status,
            context: handle,
            token: output,
        }
    }

    fn delete_security_context(&self, context: RawHandle) {
        self.release(&self.live_contexts, context);
    }

    fn query_context_token(&self, context: RawHandle) -> Result<RawHandle, SecurityStatus> {
        let token = RawHandle::new(context.lower, 0);
        self.live_tokens.lock().unwrap().insert(token);
        Ok(token)
    }

    fn close_token(&self, token: RawHandle) {
        self.release(&self.live_tokens, token);
    }

    fn token_accounts(&self, token: RawHandle) -> Result<(Account, Vec<Account>), SecurityStatus> {
        Ok((
            Account::new(format!("user{}", token.lower), "CORP", format!("S-1-5-21-7-7-7-{}", token.lower)),
            vec![
                Account::new("Domain Users", "CORP", "S-1-5-21-7-7-7-513"),
                Account::new("Everyone", "", "S-1-1-0"),
            ],
        ))
    }

    fn logon_user(
        &self,
        username: &str,
        domain: Option<&str>,
        password: &str,
        logon_type: LogonType,
        logon_provider: LogonProvider,
    ) -> Result<RawHandle, SecurityStatus> {
        self.logons.lock().unwrap().push((
            username.to_owned(),
            domain.map(str::to_owned),
            logon_type,
            logon_provider,
        ));
        if password != "secret" {
            return Err(LOGON_DENIED);
        }
        let token = self.fresh();
        self.live_tokens.lock().unwrap().insert(token);
        Ok(token)
    }

    fn lookup_account(&self, username: &str) -> Result<Account, SecurityStatus> {
        match username {
            "Administrator" => Ok(Account::new("Administrator", "CORP", "S-1-5-21-7-7-7-500")),
            // ERROR_NONE_MAPPED
            _ => Err(SecurityStatus::Other(0x8007_0534_u32 as i32)),
        }
    }

    fn domain_trusts(&self) -> Result<Vec<Domain>, SecurityStatus> {
        Ok(vec![
            Domain::new("CORP", "corp.example", "S-1-5-21-7-7-7", 0x1d),
            Domain::new("PARTNER", "partner.example", "S-1-5-21-9-9-9", 0x22),
        ])
    }

    fn computer_name(&self) -> Result<String, SecurityStatus> {
        // ERROR_NO_SUCH_DOMAIN stands in for a resolver failure
        self.computer
            .lock()
            .unwrap()
            .clone()
            .ok_or(SecurityStatus::Other(0x8007_054B_u32 as i32))
    }

    fn join_information(&self, _computer_name: &str) -> Result<(JoinStatus, String), SecurityStatus> {
        Ok((JoinStatus::Domain, "CORP".into()))
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
