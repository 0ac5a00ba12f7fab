// demos/negotiate_server.rs

//! An HTTP server protecting every route with Negotiate (Kerberos/SPNEGO/NTLM).
//!
//! Handshake state is keyed by the client's socket address, so a browser must
//! keep the connection alive across the 401 round-trips (they all do).
//!
//! # Usage
//!
//! ```bash
//! cargo run --example negotiate_server --features windows-sspi -- 0.0.0.0:8080
//! ```
//!
//! Then browse to `http://<host>:8080/` from a domain-joined machine, or:
//!
//! ```bash
//! curl --negotiate -u : http://<host>:8080/
//! ```

#[cfg(all(windows, feature = "windows-sspi"))]
mod server {
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use bytes::Bytes;
    use http::{header, Request, Response, StatusCode};
    use http_body_util::Full;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use negotiate_provider::auth::header::{append_challenges, challenge, is_ntlm_token, parse_authorization};
    use negotiate_provider::auth::windows::WindowsProvider;
    use negotiate_provider::{Negotiation, NegotiateProvider};
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut resp = Response::new(Full::new(body.into()));
        *resp.status_mut() = status;
        resp
    }

    async fn handle(
        provider: NegotiateProvider,
        peer: SocketAddr,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let connection_id = peer.to_string();

        let (scheme, token) = match parse_authorization(req.headers()) {
            Ok(Some(found)) => found,
            Ok(None) => {
                let mut resp = respond(StatusCode::UNAUTHORIZED, "authentication required\n");
                append_challenges(resp.headers_mut());
                return Ok(resp);
            }
            Err(err) => {
                provider.reset_security_token(&connection_id);
                return Ok(respond(StatusCode::BAD_REQUEST, format!("{}\n", err)));
            }
        };

        if is_ntlm_token(&token) {
            log::info!("{} fell back to NTLM", connection_id);
        }

        let outcome = provider
            .accept_security_token_async(
                connection_id.clone(),
                token,
                scheme.security_package().to_owned(),
            )
            .await;

        let resp = match outcome {
            Ok(Negotiation::Continue { token }) => {
                let mut resp = respond(StatusCode::UNAUTHORIZED, "");
                resp.headers_mut()
                    .insert(header::WWW_AUTHENTICATE, challenge(scheme, Some(&token)));
                resp
            }
            Ok(Negotiation::Complete { context, token }) => {
                let body = match context.identity() {
                    Ok(identity) => {
                        let groups: Vec<&str> = identity.groups().iter().map(|g| g.fqn()).collect();
                        format!(
                            "hello {} ({})\npackage: {}\ngroups:\n  {}\n",
                            identity.fqn(),
                            identity.sid_string(),
                            context.security_package(),
                            groups.join("\n  ")
                        )
                    }
                    Err(err) => format!("authenticated, identity unavailable: {}\n", err),
                };
                let mut resp = respond(StatusCode::OK, body);
                if let Some(token) = token {
                    resp.headers_mut()
                        .insert(header::WWW_AUTHENTICATE, challenge(scheme, Some(&token)));
                }
                resp
            }
            Err(err) => {
                log::warn!("{}: {}", connection_id, err);
                let mut resp = respond(StatusCode::UNAUTHORIZED, format!("{}\n", err));
                append_challenges(resp.headers_mut());
                resp
            }
        };

        Ok(resp)
    }

    pub async fn run(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let provider = NegotiateProvider::new(Arc::new(WindowsProvider::new()));
        let listener = TcpListener::bind(addr).await?;
        println!("listening on http://{}", addr);

        match provider.current_computer() {
            Ok(computer) => println!("computer: {} ({:?} {})", computer.name(), computer.join_status(), computer.member_of()),
            Err(err) => eprintln!("computer lookup failed: {}", err),
        }

        loop {
            let (stream, peer) = listener.accept().await?;
            let provider = provider.clone();

            tokio::spawn(async move {
                let service_provider = provider.clone();
                let service = service_fn(move |req| handle(service_provider.clone(), peer, req));

                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    log::debug!("connection {} error: {}", peer, err);
                }

                // the connection is gone, so is any half-finished handshake
                provider.reset_security_token(&peer.to_string());
            });
        }
    }
}

#[cfg(all(windows, feature = "windows-sspi"))]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8080".to_string())
        .parse()?;

    server::run(addr).await
}

#[cfg(not(all(windows, feature = "windows-sspi")))]
fn main() {
    eprintln!("This example requires Windows and the 'windows-sspi' feature.");
    eprintln!("Try running with:");
    eprintln!("  cargo run --example negotiate_server --features windows-sspi -- 127.0.0.1:8080");
    std::process::exit(1);
}
