// src/auth/windows.rs

//! [`SecurityProvider`] backed by Secur32, Advapi32 and Netapi32.

use std::ffi::c_void;
use std::ptr::null_mut;

use windows::core::{Error as WinError, HRESULT, HSTRING, PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, LocalFree, HANDLE, HLOCAL};
use windows::Win32::Networking::ActiveDirectory::{
    DsEnumerateDomainTrustsW, DS_DOMAIN_DIRECT_INBOUND, DS_DOMAIN_DIRECT_OUTBOUND,
    DS_DOMAIN_IN_FOREST, DS_DOMAIN_TRUSTSW,
};
use windows::Win32::NetworkManagement::NetManagement::{
    NetApiBufferFree, NetGetJoinInformation, NETSETUP_JOIN_STATUS,
};
use windows::Win32::Security::Authentication::Identity::{
    AcceptSecurityContext, AcquireCredentialsHandleW, DeleteSecurityContext,
    FreeCredentialsHandle, QuerySecurityContextToken, SecBuffer, SecBufferDesc, ASC_REQ_FLAGS,
    SECBUFFER_TOKEN, SECBUFFER_VERSION, SECPKG_CRED_INBOUND, SECURITY_NATIVE_DREP,
};
use windows::Win32::Security::Authorization::ConvertSidToStringSidW;
use windows::Win32::Security::Credentials::SecHandle;
use windows::Win32::Security::{
    GetTokenInformation, LogonUserW, LookupAccountNameW, LookupAccountSidW, TokenGroups,
    TokenUser, LOGON32_LOGON, LOGON32_PROVIDER, PSID, SID_NAME_USE, TOKEN_GROUPS,
    TOKEN_INFORMATION_CLASS, TOKEN_USER,
};
use windows::Win32::System::SystemInformation::{ComputerNameDnsHostname, GetComputerNameExW};

use super::lookup::{Account, Domain, JoinStatus, LogonProvider, LogonType};
use super::sspi::{AcceptOutput, RawHandle, SecurityProvider, SecurityStatus};

// Large enough for Kerberos tickets with a full PAC.
const MAX_TOKEN_SIZE: usize = 48 * 1024;

fn sec_handle(raw: RawHandle) -> SecHandle {
    SecHandle {
        dwLower: raw.lower,
        dwUpper: raw.upper,
    }
}

fn raw_handle(handle: SecHandle) -> RawHandle {
    RawHandle::new(handle.dwLower, handle.dwUpper)
}

fn token_handle(raw: RawHandle) -> HANDLE {
    HANDLE(raw.lower as *mut c_void)
}

fn status(err: WinError) -> SecurityStatus {
    SecurityStatus::from_code(err.code().0)
}

// NetApi and DsApi calls return a bare Win32 error code.
fn net_status(code: u32) -> Result<(), SecurityStatus> {
    if code == 0 {
        Ok(())
    } else {
        Err(SecurityStatus::Other(HRESULT::from_win32(code).0))
    }
}

fn wide(value: &str) -> HSTRING {
    HSTRING::from(value)
}

fn pcwstr(value: &HSTRING) -> PCWSTR {
    PCWSTR(value.as_ptr())
}

unsafe fn from_wide(value: PWSTR) -> String {
    if value.is_null() {
        String::new()
    } else {
        value.to_string().unwrap_or_default()
    }
}

unsafe fn sid_string(sid: PSID) -> Result<String, SecurityStatus> {
    let mut string_sid = PWSTR::null();
    ConvertSidToStringSidW(sid, &mut string_sid).map_err(status)?;
    let value = from_wide(string_sid);
    let _ = LocalFree(Some(HLOCAL(string_sid.0 as *mut c_void)));
    Ok(value)
}

unsafe fn account_for_sid(sid: PSID) -> Result<Account, SecurityStatus> {
    let mut name = [0u16; 256];
    let mut domain = [0u16; 256];
    let mut name_len = name.len() as u32;
    let mut domain_len = domain.len() as u32;
    let mut use_ = SID_NAME_USE::default();

    LookupAccountSidW(
        PCWSTR::null(),
        sid,
        Some(PWSTR(name.as_mut_ptr())),
        &mut name_len,
        Some(PWSTR(domain.as_mut_ptr())),
        &mut domain_len,
        &mut use_,
    )
    .map_err(status)?;

    Ok(Account::new(
        String::from_utf16_lossy(&name[..name_len as usize]),
        String::from_utf16_lossy(&domain[..domain_len as usize]),
        sid_string(sid)?,
    ))
}

unsafe fn token_information(
    token: HANDLE,
    class: TOKEN_INFORMATION_CLASS,
) -> Result<Vec<u8>, SecurityStatus> {
    let mut len = 0u32;
    // sizing call, expected to fail with ERROR_INSUFFICIENT_BUFFER
    let _ = GetTokenInformation(token, class, None, 0, &mut len);
    let mut buffer = vec![0u8; len as usize];
    GetTokenInformation(
        token,
        class,
        Some(buffer.as_mut_ptr() as *mut c_void),
        len,
        &mut len,
    )
    .map_err(status)?;
    Ok(buffer)
}

/// The native Windows security provider.
#[derive(Debug, Default)]
pub struct WindowsProvider {
    _priv: (),
}

impl WindowsProvider {
    pub fn new() -> Self {
        WindowsProvider::default()
    }
}

impl SecurityProvider for WindowsProvider {
    fn acquire_credentials_handle(&self, package: &str) -> Result<RawHandle, SecurityStatus> {
        let package = wide(package);
        let mut handle = SecHandle::default();
        let mut expiry = 0i64;

        unsafe {
            AcquireCredentialsHandleW(
                PCWSTR::null(),
                pcwstr(&package),
                SECPKG_CRED_INBOUND,
                None,
                None,
                None,
                None,
                &mut handle,
                Some(&mut expiry),
            )
        }
        .map_err(status)?;

        Ok(raw_handle(handle))
    }

    fn free_credentials_handle(&self, credentials: RawHandle) {
        let handle = sec_handle(credentials);
        if let Err(err) = unsafe { FreeCredentialsHandle(&handle) } {
            log::warn!("FreeCredentialsHandle failed: {}", err);
        }
    }

    fn accept_security_context(
        &self,
        credentials: RawHandle,
        context: Option<RawHandle>,
        token: &[u8],
        requirements: u32,
    ) -> AcceptOutput {
        let credentials = sec_handle(credentials);
        let previous = context.map(sec_handle);
        let mut new_context = previous.unwrap_or_default();

        let mut input = SecBuffer {
            cbBuffer: token.len() as u32,
            BufferType: SECBUFFER_TOKEN,
            pvBuffer: token.as_ptr() as *mut c_void,
        };
        let input_desc = SecBufferDesc {
            ulVersion: SECBUFFER_VERSION,
            cBuffers: 1,
            pBuffers: &mut input,
        };

        let mut output_bytes = vec![0u8; MAX_TOKEN_SIZE];
        let mut output = SecBuffer {
            cbBuffer: output_bytes.len() as u32,
            BufferType: SECBUFFER_TOKEN,
            pvBuffer: output_bytes.as_mut_ptr() as *mut c_void,
        };
        let mut output_desc = SecBufferDesc {
            ulVersion: SECBUFFER_VERSION,
            cBuffers: 1,
            pBuffers: &mut output,
        };
        let mut attributes = 0u32;
        let mut expiry = 0i64;

        let code = unsafe {
            AcceptSecurityContext(
                Some(&credentials),
                previous.as_ref().map(|p| p as *const SecHandle),
                Some(&input_desc),
                ASC_REQ_FLAGS(requirements),
                SECURITY_NATIVE_DREP,
                Some(&mut new_context),
                Some(&mut output_desc),
                &mut attributes,
                Some(&mut expiry),
            )
        };

        let status = SecurityStatus::from_code(code.0);
        let written = match status {
            SecurityStatus::Ok | SecurityStatus::ContinueNeeded => output.cbBuffer as usize,
            SecurityStatus::Other(_) => 0,
        };
        output_bytes.truncate(written.min(MAX_TOKEN_SIZE));

        AcceptOutput {
            status,
            context: raw_handle(new_context),
            token: output_bytes,
        }
    }

    fn delete_security_context(&self, context: RawHandle) {
        let handle = sec_handle(context);
        if let Err(err) = unsafe { DeleteSecurityContext(&handle) } {
            log::warn!("DeleteSecurityContext failed: {}", err);
        }
    }

    fn query_context_token(&self, context: RawHandle) -> Result<RawHandle, SecurityStatus> {
        let handle = sec_handle(context);
        let mut token: *mut c_void = null_mut();
        unsafe { QuerySecurityContextToken(&handle, &mut token) }.map_err(status)?;
        Ok(RawHandle::new(token as usize, 0))
    }

    fn close_token(&self, token: RawHandle) {
        if let Err(err) = unsafe { CloseHandle(token_handle(token)) } {
            log::warn!("CloseHandle on access token failed: {}", err);
        }
    }

    fn token_accounts(&self, token: RawHandle) -> Result<(Account, Vec<Account>), SecurityStatus> {
        let token = token_handle(token);
        unsafe {
            let user = token_information(token, TokenUser)?;
            let user = &*(user.as_ptr() as *const TOKEN_USER);
            let account = account_for_sid(user.User.Sid)?;

            let groups = token_information(token, TokenGroups)?;
            let groups = &*(groups.as_ptr() as *const TOKEN_GROUPS);
            let entries = std::slice::from_raw_parts(groups.Groups.as_ptr(), groups.GroupCount as usize);

            // SIDs without a resolvable name (logon SIDs, for one) are skipped
            let groups = entries
                .iter()
                .filter_map(|group| account_for_sid(group.Sid).ok())
                .collect();

            Ok((account, groups))
        }
    }

    fn logon_user(
        &self,
        username: &str,
        domain: Option<&str>,
        password: &str,
        logon_type: LogonType,
        logon_provider: LogonProvider,
    ) -> Result<RawHandle, SecurityStatus> {
        let username = wide(username);
        let domain = domain.map(wide);
        let password = wide(password);
        let mut token = HANDLE::default();

        unsafe {
            LogonUserW(
                pcwstr(&username),
                domain.as_ref().map_or(PCWSTR::null(), pcwstr),
                pcwstr(&password),
                LOGON32_LOGON(logon_type.code()),
                LOGON32_PROVIDER(logon_provider.code()),
                &mut token,
            )
        }
        .map_err(status)?;

        Ok(RawHandle::new(token.0 as usize, 0))
    }

    fn lookup_account(&self, username: &str) -> Result<Account, SecurityStatus> {
        let name = wide(username);
        let mut sid = vec![0u8; 256];
        let mut sid_len = sid.len() as u32;
        let mut domain = [0u16; 256];
        let mut domain_len = domain.len() as u32;
        let mut use_ = SID_NAME_USE::default();

        unsafe {
            LookupAccountNameW(
                PCWSTR::null(),
                pcwstr(&name),
                Some(PSID(sid.as_mut_ptr() as *mut c_void)),
                &mut sid_len,
                Some(PWSTR(domain.as_mut_ptr())),
                &mut domain_len,
                &mut use_,
            )
            .map_err(status)?;

            account_for_sid(PSID(sid.as_mut_ptr() as *mut c_void))
        }
    }

    fn domain_trusts(&self) -> Result<Vec<Domain>, SecurityStatus> {
        let mut trusts: *mut DS_DOMAIN_TRUSTSW = null_mut();
        let mut count = 0u32;
        let flags = DS_DOMAIN_DIRECT_INBOUND | DS_DOMAIN_DIRECT_OUTBOUND | DS_DOMAIN_IN_FOREST;

        net_status(unsafe { DsEnumerateDomainTrustsW(PCWSTR::null(), flags, &mut trusts, &mut count) })?;

        let domains = unsafe {
            std::slice::from_raw_parts(trusts, count as usize)
                .iter()
                .map(|trust| {
                    let sid = if trust.DomainSid.is_invalid() {
                        String::new()
                    } else {
                        sid_string(trust.DomainSid).unwrap_or_default()
                    };
                    Domain::new(
                        from_wide(trust.NetbiosDomainName),
                        from_wide(trust.DnsDomainName),
                        sid,
                        trust.Flags,
                    )
                })
                .collect()
        };

        unsafe { NetApiBufferFree(Some(trusts as *const c_void)) };
        Ok(domains)
    }

    fn computer_name(&self) -> Result<String, SecurityStatus> {
        let mut len = 0u32;
        unsafe {
            // sizing call
            let _ = GetComputerNameExW(ComputerNameDnsHostname, None, &mut len);
            let mut buffer = vec![0u16; len as usize];
            GetComputerNameExW(
                ComputerNameDnsHostname,
                Some(PWSTR(buffer.as_mut_ptr())),
                &mut len,
            )
            .map_err(status)?;
            Ok(String::from_utf16_lossy(&buffer[..len as usize]))
        }
    }

    fn join_information(&self, computer_name: &str) -> Result<(JoinStatus, String), SecurityStatus> {
        let server = wide(computer_name);
        let mut name = PWSTR::null();
        let mut join = NETSETUP_JOIN_STATUS::default();

        net_status(unsafe { NetGetJoinInformation(pcwstr(&server), &mut name, &mut join) })?;

        let member_of = unsafe { from_wide(name) };
        unsafe { NetApiBufferFree(Some(name.0 as *const c_void)) };
        Ok((JoinStatus::from_code(join.0), member_of))
    }
}
