//! End-to-end flows against an in-process identity provider, through the
//! reqwest transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use oidc_client::{
    AuthStatus, AuthorizationParameters, FileStorage, FlowOutcome, GrantType, LoginParameters,
    MemoryStorage, OAuthClient, OAuthConfig, OAuthSettings, ReqwestTransport, Storage,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;

#[derive(Default)]
struct Provider {
    base: String,
    /// code_challenge and nonce the next authorization code is bound to
    challenge: Option<String>,
    nonce: Option<String>,
    token_requests: Vec<HashMap<String, String>>,
    revoked: Vec<(String, String)>,
}

type Shared = Arc<Mutex<Provider>>;

async fn discovery(State(provider): State<Shared>) -> Json<serde_json::Value> {
    let base = provider.lock().unwrap().base.clone();
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "revocation_endpoint": format!("{base}/revoke"),
        "userinfo_endpoint": format!("{base}/userinfo"),
        "end_session_endpoint": format!("{base}/logout"),
        "code_challenge_methods_supported": ["S256"]
    }))
}

async fn token(State(provider): State<Shared>, Form(form): Form<HashMap<String, String>>) -> Response {
    let mut provider = provider.lock().unwrap();
    provider.token_requests.push(form.clone());

    match form.get("grant_type").map(String::as_str) {
        Some("client_credentials") => Json(json!({
            "access_token": "service-token",
            "token_type": "Bearer",
            "expires_in": 3600
        }))
        .into_response(),
        Some("authorization_code") => {
            let verifier = form.get("code_verifier").cloned().unwrap_or_default();
            let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
            if form.get("code").map(String::as_str) != Some("c0de")
                || provider.challenge.as_deref() != Some(challenge.as_str())
            {
                return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"})))
                    .into_response();
            }
            let claims = json!({"sub": "u-42", "nonce": provider.nonce});
            let id_token = format!(
                "eyJhbGciOiJub25lIn0.{}.",
                URL_SAFE_NO_PAD.encode(claims.to_string())
            );
            Json(json!({
                "access_token": "user-token",
                "refresh_token": "user-refresh",
                "id_token": id_token,
                "token_type": "Bearer",
                "expires_in": 3600
            }))
            .into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported_grant_type"})),
        )
            .into_response(),
    }
}

async fn revoke(State(provider): State<Shared>, Form(form): Form<HashMap<String, String>>) -> StatusCode {
    let mut provider = provider.lock().unwrap();
    provider.revoked.push((
        form.get("token").cloned().unwrap_or_default(),
        form.get("token_type_hint").cloned().unwrap_or_default(),
    ));
    StatusCode::OK
}

async fn userinfo(headers: HeaderMap) -> Response {
    match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some("Bearer user-token") | Some("Bearer service-token") => {
            Json(json!({"sub": "u-42", "name": "Jane Doe"})).into_response()
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_token", "error_description": "token revoked"})),
        )
            .into_response(),
    }
}

async fn start_provider() -> (String, Shared, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let provider: Shared = Arc::new(Mutex::new(Provider {
        base: base.clone(),
        ..Default::default()
    }));

    let app = Router::new()
        .route("/.well-known/openid-configuration", get(discovery))
        .route("/token", post(token))
        .route("/revoke", post(revoke))
        .route("/userinfo", get(userinfo))
        .with_state(provider.clone());
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (base, provider, handle)
}

async fn client(base: &str, storage: Arc<dyn Storage>) -> OAuthClient {
    OAuthClient::new(
        OAuthSettings {
            config: OAuthConfig {
                issuer_path: Some(base.to_string()),
                client_id: Some("cli".into()),
                ..Default::default()
            },
            ..Default::default()
        },
        storage,
        Arc::new(ReqwestTransport::default()),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn client_credentials_userinfo_and_revoke() {
    let (base, provider, server) = start_provider().await;
    let client = client(&base, Arc::new(MemoryStorage::new())).await;

    assert_eq!(client.login(None).await, FlowOutcome::Done);
    assert_eq!(client.status(), AuthStatus::Authorized);
    assert_eq!(client.token().grant_type, Some(GrantType::ClientCredentials));

    let config = client.config_store().config().await;
    assert_eq!(config.token_path, Some(format!("{base}/token")));
    assert_eq!(config.pkce, Some(true));

    let user = client.load_user_info().await.unwrap();
    assert_eq!(user.sub.as_deref(), Some("u-42"));

    assert_eq!(client.logout(None).await, FlowOutcome::Done);
    assert_eq!(client.status(), AuthStatus::NotAuthorized);
    assert_eq!(
        provider.lock().unwrap().revoked,
        vec![("service-token".to_string(), "access_token".to_string())]
    );

    server.abort();
}

#[tokio::test]
async fn authorization_code_with_pkce() {
    let (base, provider, server) = start_provider().await;
    let client = client(&base, Arc::new(MemoryStorage::new())).await;

    let outcome = client
        .login(Some(LoginParameters::Authorization(AuthorizationParameters {
            redirect_uri: Some("http://app.local/cb".into()),
            response_type: "code".into(),
            state: Some("st-1".into()),
        })))
        .await;
    let FlowOutcome::Redirect(url) = &outcome else {
        panic!("expected a redirect, got {outcome:?}");
    };
    assert!(url.starts_with(&format!("{base}/authorize?client_id=cli&")));

    // The provider binds the code to the challenge and nonce it was shown
    let param = |name: &str| {
        url.split('&')
            .find_map(|pair| pair.strip_prefix(&format!("{name}=")).map(String::from))
    };
    {
        let mut provider = provider.lock().unwrap();
        provider.challenge = param("code_challenge");
        provider.nonce = param("nonce");
        assert!(provider.nonce.is_some());
    }

    assert!(client.oauth_callback("http://app.local/cb?code=c0de&state=st-1").await);
    assert_eq!(client.state().as_deref(), Some("st-1"));

    let token = client.token();
    assert_eq!(token.access_token.as_deref(), Some("user-token"));
    assert_eq!(token.grant_type, Some(GrantType::AuthorizationCode));
    assert!(client.is_authorized());
    assert_eq!(client.user().unwrap().sub.as_deref(), Some("u-42"));

    let exchange = provider.lock().unwrap().token_requests[0].clone();
    assert_eq!(exchange["redirect_uri"], "http://app.local/cb");
    assert_eq!(exchange["client_id"], "cli");

    server.abort();
}

#[tokio::test]
async fn unauthorized_response_becomes_token() {
    let (base, _provider, server) = start_provider().await;
    let client = client(&base, Arc::new(MemoryStorage::new())).await;
    client
        .token_store()
        .write(oidc_client::Token {
            access_token: Some("stolen".into()),
            token_type: Some("Bearer".into()),
            ..Default::default()
        })
        .await;

    let err = client.http().get(&format!("{base}/userinfo")).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(client.status(), AuthStatus::Denied);
    assert_eq!(
        client.token_store().error_description().as_deref(),
        Some("token revoked")
    );

    server.abort();
}

#[tokio::test]
async fn token_survives_restart_with_file_storage() {
    let (base, _provider, server) = start_provider().await;
    let dir = tempfile::tempdir().unwrap();

    {
        let storage = Arc::new(FileStorage::open(dir.path().to_path_buf()).await.unwrap());
        let client = client(&base, storage).await;
        client.login(None).await;
        assert!(client.is_authorized());
    }

    let storage = Arc::new(FileStorage::open(dir.path().to_path_buf()).await.unwrap());
    let restarted = client(&base, storage).await;
    assert_eq!(
        restarted.token().access_token.as_deref(),
        Some("service-token")
    );
    assert!(restarted.is_authorized());

    server.abort();
}
