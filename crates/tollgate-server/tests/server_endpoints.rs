use std::time::Duration;

use reqwest::{StatusCode, Url, redirect::Policy};
use serde_json::Value;
use tokio::task::JoinHandle;
use tollgate_server::config::{ClientSeed, UserSeed};
use tollgate_server::{AppConfig, build_app};

const REDIRECT_URI: &str = "http://localhost:3000/callback";
const WEB_SECRET: &str = "web-secret";
// RFC 7636 appendix B
const CODE_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const CODE_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

fn client_seed(client_id: &str, secret: Option<&str>) -> ClientSeed {
    ClientSeed {
        client_id: client_id.to_string(),
        client_secret: secret.map(str::to_string),
        display_name: None,
        require_pkce: false,
        redirect_uris: Vec::new(),
        post_logout_redirect_uris: Vec::new(),
        scopes: Vec::new(),
        grant_types: Vec::new(),
    }
}

fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.auth.issuer = "http://tollgate.test".to_string();
    cfg.auth.audience = "http://api.tollgate.test".to_string();
    cfg.auth.password.iterations = 10_000;
    cfg.auth.device.interval = Duration::from_secs(1);
    cfg.housekeeping.enabled = false;

    cfg.bootstrap.clients = vec![
        ClientSeed {
            display_name: Some("Web App".to_string()),
            require_pkce: true,
            redirect_uris: vec![REDIRECT_URI.to_string()],
            scopes: vec!["email".to_string()],
            ..client_seed("web", Some(WEB_SECRET))
        },
        client_seed("svc", Some("svc-secret")),
        client_seed("tv", None),
    ];
    cfg.bootstrap.users = vec![UserSeed {
        id: Some("alice-id".to_string()),
        username: "alice".to_string(),
        password: Some("wonderland".to_string()),
        given_name: Some("Alice".to_string()),
        family_name: Some("Liddell".to_string()),
        email: Some("alice@example.test".to_string()),
        email_verified: true,
    }];
    cfg
}

async fn start_server() -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let app = build_app(&test_config()).await.expect("build app");

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}"), tx, server)
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

async fn introspect(client: &reqwest::Client, base: &str, token: &str) -> Value {
    let resp = client
        .post(format!("{base}/connect/introspect"))
        .basic_auth("web", Some(WEB_SECRET))
        .form(&[("token", token)])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn server_endpoints_work() {
    let (base, shutdown_tx, handle) = start_server().await;
    let client = reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .unwrap();

    // GET /healthz
    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // Discovery and JWKS
    let resp = client
        .get(format!("{base}/.well-known/openid-configuration"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["issuer"], "http://tollgate.test");
    assert_eq!(body["token_endpoint"], "http://tollgate.test/connect/token");

    let resp = client
        .get(format!("{base}/.well-known/jwks"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kty"], "RSA");

    // Authorization request without a signed-in user is refused
    let authorize_params = [
        ("response_type", "code"),
        ("client_id", "web"),
        ("redirect_uri", REDIRECT_URI),
        ("scope", "openid profile email"),
        ("state", "xyz"),
        ("code_challenge", CODE_CHALLENGE),
        ("code_challenge_method", "S256"),
    ];
    let resp = client
        .get(format!("{base}/connect/authorize"))
        .query(&authorize_params)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_redirection());
    let location = Url::parse(resp.headers()["location"].to_str().unwrap()).unwrap();
    assert_eq!(query_param(&location, "error").as_deref(), Some("access_denied"));

    // Unregistered redirect URI is never redirected to
    let resp = client
        .get(format!("{base}/connect/authorize"))
        .header("x-authenticated-subject", "alice-id")
        .query(&[
            ("response_type", "code"),
            ("client_id", "web"),
            ("redirect_uri", "https://evil.test/cb"),
            ("scope", "openid"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Authorization code with PKCE
    let resp = client
        .get(format!("{base}/connect/authorize"))
        .header("x-authenticated-subject", "alice-id")
        .query(&authorize_params)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_redirection());
    let location = Url::parse(resp.headers()["location"].to_str().unwrap()).unwrap();
    assert!(location.as_str().starts_with(REDIRECT_URI));
    assert_eq!(query_param(&location, "state").as_deref(), Some("xyz"));
    let code = query_param(&location, "code").expect("code in redirect");

    // Wrong verifier is rejected and burns nothing
    let resp = client
        .post(format!("{base}/connect/token"))
        .basic_auth("web", Some(WEB_SECRET))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", "wrong-verifier-wrong-verifier-wrong-verifier"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_grant");

    let token_form = [
        ("grant_type", "authorization_code"),
        ("code", code.as_str()),
        ("redirect_uri", REDIRECT_URI),
        ("code_verifier", CODE_VERIFIER),
    ];
    let resp = client
        .post(format!("{base}/connect/token"))
        .basic_auth("web", Some(WEB_SECRET))
        .form(&token_form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["cache-control"], "no-store");
    let tokens: Value = resp.json().await.unwrap();
    assert_eq!(tokens["token_type"], "Bearer");
    assert!(tokens["id_token"].is_string());
    let access_token = tokens["access_token"].as_str().unwrap().to_string();
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    // Userinfo
    let resp = client
        .get(format!("{base}/connect/userinfo"))
        .bearer_auth(&access_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let info: Value = resp.json().await.unwrap();
    assert_eq!(info["sub"], "alice-id");
    assert_eq!(info["email"], "alice@example.test");

    let resp = client
        .get(format!("{base}/connect/userinfo"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().contains_key("www-authenticate"));

    // Introspection
    let body = introspect(&client, &base, &access_token).await;
    assert_eq!(body["active"], true);
    assert_eq!(body["sub"], "alice-id");
    assert_eq!(body["username"], "alice");
    assert_eq!(body["client_id"], "web");

    let body = introspect(&client, &base, &refresh_token).await;
    assert_eq!(body["active"], true);

    // Public clients may not introspect
    let resp = client
        .post(format!("{base}/connect/introspect"))
        .form(&[("client_id", "tv"), ("token", access_token.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_client");
    assert!(body.get("sub").is_none());

    // Bad client credentials get a Basic challenge
    let resp = client
        .post(format!("{base}/connect/token"))
        .basic_auth("web", Some("not-the-secret"))
        .form(&token_form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().contains_key("www-authenticate"));

    // Replaying the code fails and revokes everything issued from it
    let resp = client
        .post(format!("{base}/connect/token"))
        .basic_auth("web", Some(WEB_SECRET))
        .form(&token_form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_grant");

    let body = introspect(&client, &base, &access_token).await;
    assert_eq!(body["active"], false);
    let body = introspect(&client, &base, &refresh_token).await;
    assert_eq!(body["active"], false);

    // Client credentials, then revocation
    let resp = client
        .post(format!("{base}/connect/token"))
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", "svc"),
            ("client_secret", "svc-secret"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let tokens: Value = resp.json().await.unwrap();
    assert!(tokens.get("refresh_token").is_none());
    let service_token = tokens["access_token"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{base}/connect/revoke"))
        .basic_auth("svc", Some("svc-secret"))
        .form(&[("token", service_token.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = introspect(&client, &base, &service_token).await;
    assert_eq!(body["active"], false);

    // Unknown tokens are silently accepted for revocation
    let resp = client
        .post(format!("{base}/connect/revoke"))
        .basic_auth("svc", Some("svc-secret"))
        .form(&[("token", "no-such-token")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Device authorization grant
    let resp = client
        .post(format!("{base}/connect/device"))
        .form(&[("client_id", "tv"), ("scope", "openid profile")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let device: Value = resp.json().await.unwrap();
    let device_code = device["device_code"].as_str().unwrap().to_string();
    let user_code = device["user_code"].as_str().unwrap().to_string();
    assert_eq!(device["interval"], 1);

    let poll_form = [
        ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
        ("device_code", device_code.as_str()),
        ("client_id", "tv"),
    ];
    let resp = client
        .post(format!("{base}/connect/token"))
        .form(&poll_form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "authorization_pending");

    let resp = client
        .get(format!("{base}/connect/device/verify"))
        .query(&[("user_code", user_code.to_lowercase())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let pending: Value = resp.json().await.unwrap();
    assert_eq!(pending["client_id"], "tv");
    assert_eq!(pending["scope"], "openid profile");

    // Deciding requires a signed-in user
    let resp = client
        .post(format!("{base}/connect/device/verify"))
        .form(&[("user_code", user_code.as_str()), ("action", "approve")])
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());

    let resp = client
        .post(format!("{base}/connect/device/verify"))
        .header("x-authenticated-subject", "alice-id")
        .form(&[("user_code", user_code.as_str()), ("action", "approve")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let resp = client
        .post(format!("{base}/connect/token"))
        .form(&poll_form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let tokens: Value = resp.json().await.unwrap();
    assert!(tokens["id_token"].is_string());

    // The device code is single use
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let resp = client
        .post(format!("{base}/connect/token"))
        .form(&poll_form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_grant");

    // Shutdown server
    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
