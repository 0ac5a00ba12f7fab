// src/auth/lookup.rs

//! Read-only account, identity, domain and computer snapshots.
//!
//! These are thin wrappers over single native calls. Nothing here keeps state
//! between calls except [`Identity`], which owns its access token.

use std::fmt;
use std::sync::Arc;

use super::sspi::{RawHandle, SecurityProvider};

/// A security principal: user, group, or computer account.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Account {
    name: String,
    domain: String,
    fqn: String,
    sid_string: String,
}

impl Account {
    pub fn new(name: impl Into<String>, domain: impl Into<String>, sid_string: impl Into<String>) -> Self {
        let name = name.into();
        let domain = domain.into();
        let fqn = if domain.is_empty() {
            name.clone()
        } else {
            format!("{}\\{}", domain, name)
        };

        Account {
            name,
            domain,
            fqn,
            sid_string: sid_string.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// `DOMAIN\name`, or just `name` for accounts without a domain.
    pub fn fqn(&self) -> &str {
        &self.fqn
    }

    /// The SID in `S-1-5-...` form.
    pub fn sid_string(&self) -> &str {
        &self.sid_string
    }
}

/// An authenticated user, backed by a native access token that is closed on drop.
pub struct Identity {
    provider: Arc<dyn SecurityProvider>,
    token: RawHandle,
    account: Account,
    groups: Vec<Account>,
}

impl Identity {
    pub(crate) fn from_token(provider: &Arc<dyn SecurityProvider>, token: RawHandle) -> crate::Result<Identity> {
        let mut identity = Identity {
            provider: Arc::clone(provider),
            token,
            account: Account::new("", "", ""),
            groups: Vec::new(),
        };

        // the token is closed by `identity`'s drop if this fails
        let (account, groups) = provider.token_accounts(token).map_err(crate::error::native)?;
        identity.account = account;
        identity.groups = groups;
        Ok(identity)
    }

    pub fn raw(&self) -> RawHandle {
        self.token
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn fqn(&self) -> &str {
        self.account.fqn()
    }

    pub fn sid_string(&self) -> &str {
        self.account.sid_string()
    }

    pub fn groups(&self) -> &[Account] {
        &self.groups
    }

    /// Well-known SID `S-1-5-21-*-501`, or the anonymous logon `S-1-5-7`.
    pub fn is_guest(&self) -> bool {
        let sid = self.sid_string();
        sid == "S-1-5-7" || (sid.starts_with("S-1-5-21-") && sid.ends_with("-501"))
    }
}

impl Drop for Identity {
    fn drop(&mut self) {
        if !self.token.is_null() {
            self.provider.close_token(self.token);
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("token", &self.token)
            .field("account", &self.account)
            .field("groups", &self.groups.len())
            .finish()
    }
}

/// `LOGON32_LOGON_*`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogonType {
    Interactive,
    #[default]
    Network,
    Batch,
    Service,
    Unlock,
    NetworkCleartext,
    NewCredentials,
}

impl LogonType {
    pub fn code(self) -> u32 {
        match self {
            LogonType::Interactive => 2,
            LogonType::Network => 3,
            LogonType::Batch => 4,
            LogonType::Service => 5,
            LogonType::Unlock => 7,
            LogonType::NetworkCleartext => 8,
            LogonType::NewCredentials => 9,
        }
    }
}

/// `LOGON32_PROVIDER_*`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogonProvider {
    #[default]
    Default,
    WinNT35,
    WinNT40,
    WinNT50,
}

impl LogonProvider {
    pub fn code(self) -> u32 {
        match self {
            LogonProvider::Default => 0,
            LogonProvider::WinNT35 => 1,
            LogonProvider::WinNT40 => 2,
            LogonProvider::WinNT50 => 3,
        }
    }
}

/// Split `DOMAIN\user` on the first backslash.
///
/// `user@domain` is passed through untouched, the platform understands UPNs.
pub(crate) fn split_domain_user(username: &str) -> (Option<&str>, &str) {
    match username.split_once('\\') {
        Some((domain, user)) => (Some(domain), user),
        None => (None, username),
    }
}

// DS_DOMAIN_* flags from DsEnumerateDomainTrusts
const DS_DOMAIN_IN_FOREST: u32 = 0x0001;
const DS_DOMAIN_DIRECT_OUTBOUND: u32 = 0x0002;
const DS_DOMAIN_TREE_ROOT: u32 = 0x0004;
const DS_DOMAIN_PRIMARY: u32 = 0x0008;
const DS_DOMAIN_DIRECT_INBOUND: u32 = 0x0020;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustDirection {
    Disabled,
    Inbound,
    Outbound,
    Bidirectional,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustType {
    /// The domain this machine belongs to.
    Primary,
    TreeRoot,
    /// Another domain in the same forest.
    InForest,
    /// A directly trusted domain outside the forest.
    External,
    Unknown,
}

/// A domain trusted by (or trusting) the local machine's domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Domain {
    netbios_name: String,
    dns_name: String,
    sid_string: String,
    flags: u32,
}

impl Domain {
    pub fn new(
        netbios_name: impl Into<String>,
        dns_name: impl Into<String>,
        sid_string: impl Into<String>,
        flags: u32,
    ) -> Self {
        Domain {
            netbios_name: netbios_name.into(),
            dns_name: dns_name.into(),
            sid_string: sid_string.into(),
            flags,
        }
    }

    pub fn netbios_name(&self) -> &str {
        &self.netbios_name
    }

    pub fn dns_name(&self) -> &str {
        &self.dns_name
    }

    pub fn sid_string(&self) -> &str {
        &self.sid_string
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// DNS name when known, otherwise the NetBIOS name.
    pub fn fqn(&self) -> &str {
        if self.dns_name.is_empty() {
            &self.netbios_name
        } else {
            &self.dns_name
        }
    }

    pub fn trust_direction(&self) -> TrustDirection {
        let inbound = self.flags & DS_DOMAIN_DIRECT_INBOUND != 0;
        let outbound = self.flags & DS_DOMAIN_DIRECT_OUTBOUND != 0;
        match (inbound, outbound) {
            (true, true) => TrustDirection::Bidirectional,
            (true, false) => TrustDirection::Inbound,
            (false, true) => TrustDirection::Outbound,
            (false, false) => TrustDirection::Disabled,
        }
    }

    pub fn trust_type(&self) -> TrustType {
        if self.flags & DS_DOMAIN_PRIMARY != 0 {
            TrustType::Primary
        } else if self.flags & DS_DOMAIN_TREE_ROOT != 0 {
            TrustType::TreeRoot
        } else if self.flags & DS_DOMAIN_IN_FOREST != 0 {
            TrustType::InForest
        } else if self.flags & (DS_DOMAIN_DIRECT_INBOUND | DS_DOMAIN_DIRECT_OUTBOUND) != 0 {
            TrustType::External
        } else {
            TrustType::Unknown
        }
    }
}

/// `NETSETUP_JOIN_STATUS`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JoinStatus {
    #[default]
    Unknown,
    Unjoined,
    Workgroup,
    Domain,
}

impl JoinStatus {
    pub fn from_code(code: i32) -> JoinStatus {
        match code {
            1 => JoinStatus::Unjoined,
            2 => JoinStatus::Workgroup,
            3 => JoinStatus::Domain,
            _ => JoinStatus::Unknown,
        }
    }
}

/// The local machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Computer {
    name: String,
    join_status: JoinStatus,
    member_of: String,
}

impl Computer {
    pub fn new(name: impl Into<String>, join_status: JoinStatus, member_of: impl Into<String>) -> Self {
        Computer {
            name: name.into(),
            join_status,
            member_of: member_of.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn join_status(&self) -> JoinStatus {
        self.join_status
    }

    /// Workgroup or domain name, empty when unjoined.
    pub fn member_of(&self) -> &str {
        &self.member_of
    }
}
