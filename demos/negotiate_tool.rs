// demos/negotiate_tool.rs

//! Query the local security provider from the command line.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example negotiate_tool --features windows-sspi -- computer
//! cargo run --example negotiate_tool --features windows-sspi -- domains
//! cargo run --example negotiate_tool --features windows-sspi -- lookup Administrator
//! cargo run --example negotiate_tool --features windows-sspi -- logon 'CORP\alice' 'P@ssw0rd'
//! ```

#[cfg(all(windows, feature = "windows-sspi"))]
fn print_usage() {
    eprintln!("Usage: negotiate_tool <command> [ARGS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  computer                    Show the local computer and its join status");
    eprintln!("  domains                     List trusted domains");
    eprintln!("  lookup <account>            Resolve an account name to its SID");
    eprintln!("  logon <user> <password>     Log on (DOMAIN\\user, user@domain or user)");
}

#[cfg(all(windows, feature = "windows-sspi"))]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use negotiate_provider::auth::windows::WindowsProvider;
    use negotiate_provider::NegotiateProvider;

    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let provider = NegotiateProvider::builder()
        .background_sweep(false)
        .build(std::sync::Arc::new(WindowsProvider::new()));

    match args.iter().map(String::as_str).collect::<Vec<_>>()[..] {
        ["computer"] => {
            let computer = provider.current_computer()?;
            println!("Name:      {}", computer.name());
            println!("Status:    {:?}", computer.join_status());
            println!("Member of: {}", computer.member_of());
        }
        ["domains"] => {
            for domain in provider.domains()? {
                println!(
                    "{:<30} {:<15} {:?} / {:?}",
                    domain.fqn(),
                    domain.netbios_name(),
                    domain.trust_type(),
                    domain.trust_direction()
                );
            }
        }
        ["lookup", account] => {
            let account = provider.lookup_account(account)?;
            println!("{} {}", account.fqn(), account.sid_string());
        }
        ["logon", username, password] => {
            let identity = provider.logon_user(username, password)?;
            println!("{} {}", identity.fqn(), identity.sid_string());
            if identity.is_guest() {
                println!("  (guest)");
            }
            for group in identity.groups() {
                println!("  {} {}", group.fqn(), group.sid_string());
            }
        }
        _ => {
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}

#[cfg(not(all(windows, feature = "windows-sspi")))]
fn main() {
    eprintln!("This example requires Windows and the 'windows-sspi' feature.");
    eprintln!("Try running with:");
    eprintln!("  cargo run --example negotiate_tool --features windows-sspi -- computer");
    std::process::exit(1);
}
