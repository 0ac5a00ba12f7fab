// tests/negotiate_integration.rs

//! HTTP-shaped Negotiate flows and concurrent handshakes.
//!
//! The fake provider stands in for SSPI, so these verify the protocol flow and
//! per-connection bookkeeping, not Kerberos itself.

mod support;

use std::sync::Arc;

use base64::Engine as _;
use http::{header, Request, Response, StatusCode};
use negotiate_provider::auth::header::{append_challenges, challenge, parse_authorization};
use negotiate_provider::{Negotiation, NegotiateProvider};
use support::FakeProvider;

/// What a server filter does with one request on connection `peer`.
fn handle(provider: &NegotiateProvider, peer: &str, req: &Request<()>) -> Response<String> {
    let (scheme, token) = match parse_authorization(req.headers()) {
        Ok(Some(found)) => found,
        Ok(None) => {
            let mut resp = Response::new("unauthorized".to_string());
            *resp.status_mut() = StatusCode::UNAUTHORIZED;
            append_challenges(resp.headers_mut());
            return resp;
        }
        Err(_) => {
            provider.reset_security_token(peer);
            let mut resp = Response::new("bad token".to_string());
            *resp.status_mut() = StatusCode::BAD_REQUEST;
            return resp;
        }
    };

    match provider.accept_security_token(peer, &token, scheme.security_package()) {
        Ok(Negotiation::Continue { token }) => {
            let mut resp = Response::new(String::new());
            *resp.status_mut() = StatusCode::UNAUTHORIZED;
            resp.headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge(scheme, Some(&token)));
            resp
        }
        Ok(Negotiation::Complete { context, token }) => {
            let identity = context.identity().unwrap();
            let mut resp = Response::new(format!("hello {}", identity.fqn()));
            if let Some(token) = token {
                resp.headers_mut()
                    .insert(header::WWW_AUTHENTICATE, challenge(scheme, Some(&token)));
            }
            resp
        }
        Err(_) => {
            let mut resp = Response::new("denied".to_string());
            *resp.status_mut() = StatusCode::UNAUTHORIZED;
            resp
        }
    }
}

fn request(authorization: Option<String>) -> Request<()> {
    let mut builder = Request::builder().uri("/protected");
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(()).unwrap()
}

fn negotiate(token: &[u8]) -> Option<String> {
    Some(format!(
        "Negotiate {}",
        base64::engine::general_purpose::STANDARD.encode(token)
    ))
}

fn engine(fake: &Arc<FakeProvider>) -> NegotiateProvider {
    support::init_logging();
    NegotiateProvider::builder()
        .background_sweep(false)
        .build(fake.clone())
}

#[test]
fn test_no_authorization_gets_challenges() {
    let fake = FakeProvider::new();
    let provider = engine(&fake);

    let resp = handle(&provider, "10.0.0.1:5000", &request(None));
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let challenges: Vec<_> = resp.headers().get_all(header::WWW_AUTHENTICATE).iter().collect();
    assert_eq!(challenges, ["Negotiate", "NTLM"]);
}

#[test]
fn test_full_http_handshake() {
    let fake = FakeProvider::new();
    let provider = engine(&fake);
    let peer = "10.0.0.1:5000";

    let resp = handle(&provider, peer, &request(negotiate(b"continue-type1")));
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let challenge = resp.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
    let server_token = base64::engine::general_purpose::STANDARD
        .decode(challenge.strip_prefix("Negotiate ").unwrap())
        .unwrap();
    assert_eq!(server_token, b"srv:continue-type1");

    let resp = handle(&provider, peer, &request(negotiate(b"ok-type3")));
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.body().starts_with("hello CORP\\user"));
    assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));

    assert_eq!(provider.continue_contexts_len(), 0);
    assert_eq!(fake.live_contexts(), 0);
    assert_eq!(fake.live_tokens(), 0);
}

#[test]
fn test_malformed_authorization_resets_connection() {
    let fake = FakeProvider::new();
    let provider = engine(&fake);
    let peer = "10.0.0.2:6000";

    handle(&provider, peer, &request(negotiate(b"continue")));
    assert_eq!(provider.continue_contexts_len(), 1);

    let resp = handle(&provider, peer, &request(Some("Negotiate ***".into())));
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(provider.continue_contexts_len(), 0);
    assert_eq!(fake.live_contexts(), 0);
}

#[test]
fn test_interleaved_connections_do_not_mix() {
    let fake = FakeProvider::new();
    let provider = engine(&fake);

    handle(&provider, "a", &request(negotiate(b"continue-a")));
    handle(&provider, "b", &request(negotiate(b"continue-b")));
    assert_eq!(provider.continue_contexts_len(), 2);

    // a fails, b is unaffected
    let resp = handle(&provider, "a", &request(negotiate(b"fail-a")));
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(!provider.contexts().contains("a"));
    assert!(provider.contexts().contains("b"));

    let resp = handle(&provider, "b", &request(negotiate(b"ok-b")));
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(fake.live_contexts(), 0);
}

#[test]
fn test_concurrent_handshakes_are_isolated() {
    const CONNECTIONS: usize = 16;

    let fake = FakeProvider::new();
    let provider = engine(&fake);

    std::thread::scope(|scope| {
        for n in 0..CONNECTIONS {
            let provider = &provider;
            scope.spawn(move || {
                let peer = format!("192.0.2.{}:443", n);

                for round in 0..3 {
                    let token = format!("continue-{}-{}", n, round);
                    let outcome = provider
                        .accept_security_token(&peer, token.as_bytes(), "Negotiate")
                        .unwrap();
                    let expected = format!("srv:{}", token);
                    assert_eq!(outcome.token().map(|t| &t[..]), Some(expected.as_bytes()));
                    assert!(provider.contexts().contains(&peer));
                }

                let token = format!("ok-{}", n);
                let done = provider
                    .accept_security_token(&peer, token.as_bytes(), "Negotiate")
                    .unwrap();
                assert!(done.is_complete());
                assert!(!provider.contexts().contains(&peer));
            });
        }
    });

    assert_eq!(provider.continue_contexts_len(), 0);
    assert_eq!(fake.live_contexts(), 0);
    assert_eq!(fake.live_credentials(), 0);
    assert_eq!(fake.double_releases(), 0);

    // every round after the first was fed its own connection's context
    let accepted = fake.accepted.lock().unwrap();
    assert_eq!(accepted.len(), CONNECTIONS * 4);
    assert_eq!(accepted.iter().filter(|(previous, _)| previous.is_none()).count(), CONNECTIONS);
}

#[test]
fn test_concurrent_rounds_on_one_connection() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 100;

    let fake = FakeProvider::new();
    let provider = engine(&fake);

    std::thread::scope(|scope| {
        for n in 0..THREADS {
            let provider = &provider;
            scope.spawn(move || {
                for round in 0..ROUNDS {
                    let token = format!("continue-{}-{}", n, round);
                    let outcome = provider
                        .accept_security_token("k", token.as_bytes(), "Negotiate")
                        .unwrap();
                    assert!(!outcome.is_complete());
                    assert!(provider.contexts().get("k").is_some());
                }
            });
        }
    });

    // every round replaced the one before it, exactly one survives
    assert_eq!(fake.live_contexts(), 1);
    assert_eq!(fake.double_releases(), 0);
    assert_eq!(provider.continue_contexts_len(), 1);

    let accepted = fake.accepted.lock().unwrap();
    assert_eq!(accepted.len(), THREADS * ROUNDS);
    assert_eq!(accepted.iter().filter(|(previous, _)| previous.is_none()).count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_async_handshakes() {
    let fake = FakeProvider::in_place();
    let provider = NegotiateProvider::new(fake.clone());

    let mut tasks = Vec::new();
    for n in 0..8 {
        let provider = provider.clone();
        tasks.push(tokio::spawn(async move {
            let peer = format!("peer-{}", n);
            let first = provider
                .accept_security_token_async(peer.clone(), b"continue".to_vec(), "NTLM".into())
                .await
                .unwrap();
            assert!(!first.is_complete());
            provider
                .accept_security_token_async(peer, b"ok".to_vec(), "NTLM".into())
                .await
                .unwrap()
                .into_context()
                .unwrap()
                .raw()
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }
    handles.sort_by_key(|h| h.lower);
    handles.dedup();
    assert_eq!(handles.len(), 8);

    assert_eq!(provider.continue_contexts_len(), 0);
    assert_eq!(fake.live_contexts(), 0);
    assert_eq!(fake.double_releases(), 0);
}
