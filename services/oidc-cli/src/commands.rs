//! Command execution against an `OAuthClient`
//!
//! Each command returns the text to print on stdout. Anything that needs a
//! browser (authorization and end session URLs) is printed for the user to
//! open; the redirect back is handed to `callback`. Tokens are stamped with
//! their expiry by the store itself, so a refresh made during `get` or
//! `userinfo` persists an absolute `expires` for the next run.

use anyhow::{Result, bail};
use oidc_client::{
    AuthStatus, AuthorizationParameters, FlowOutcome, LoginParameters, OAuthClient,
};
use serde_json::{Value, json};
use tracing::info;

use crate::cli::Command;
use crate::error::Error;

pub async fn run(client: &OAuthClient, command: Command) -> Result<String> {
    match command {
        Command::Login { username, password } => {
            let parameters = match (username, password) {
                (Some(username), Some(password)) => {
                    Some(LoginParameters::Resource { username, password })
                }
                _ => None,
            };
            client.login(parameters).await;

            let report = status_report(client).await;
            if client.status() != AuthStatus::Authorized {
                bail!("login failed: {}", pretty(&report));
            }
            Ok(pretty(&report))
        }
        Command::AuthorizeUrl {
            redirect_uri,
            response_type,
            state,
        } => {
            let state = state.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let params = AuthorizationParameters {
                redirect_uri,
                response_type,
                state: Some(state),
            };
            match client
                .login(Some(LoginParameters::Authorization(params)))
                .await
            {
                FlowOutcome::Redirect(url) => Ok(url),
                FlowOutcome::Done => Err(Error::Unavailable(
                    "authorization URL (check authorize_path and redirect_uri)".into(),
                )
                .into()),
            }
        }
        Command::Callback { url } => {
            if !client.oauth_callback(&url).await {
                return Err(Error::CallbackNotRecognized(url).into());
            }

            let mut report = status_report(client).await;
            report["state"] = json!(client.state());
            Ok(pretty(&report))
        }
        Command::Logout { redirect } => match client.logout(redirect.as_deref()).await {
            FlowOutcome::Redirect(url) => Ok(url),
            FlowOutcome::Done => Ok("logged out".to_string()),
        },
        Command::Status => Ok(pretty(&status_report(client).await)),
        Command::UserInfo => {
            let user = match client.load_user_info().await {
                Some(user) => Some(user),
                None => client.user(),
            };
            match user {
                Some(user) => Ok(pretty(&serde_json::to_value(user)?)),
                None => Err(Error::Unavailable("userinfo".into()).into()),
            }
        }
        Command::Introspect => match client.introspect().await {
            Some(info) => Ok(pretty(&serde_json::to_value(info)?)),
            None => Err(Error::Unavailable("introspection".into()).into()),
        },
        Command::Get { url } => match client.http().get(&url).await {
            Ok(response) => {
                info!(status = response.status, "request complete");
                Ok(pretty(&response.data))
            }
            Err(err) => {
                let body = err.response.as_ref().map(|r| pretty(&r.data));
                match body {
                    Some(body) => bail!("{err}\n{body}"),
                    None => bail!("{err}"),
                }
            }
        },
    }
}

/// Token summary without any secret material.
pub async fn status_report(client: &OAuthClient) -> Value {
    let token = client.token();
    json!({
        "status": client.status().label(),
        "grant_type": token.grant_type,
        "token_type": token.token_type,
        "scope": token.scope,
        "expires": token.expires,
        "expired": token.is_expired(),
        "has_refresh_token": token.refresh_token.is_some(),
        "error": token.error,
        "error_description": token.error_description,
        "storage_key": client.token_store().storage_key().await,
    })
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
