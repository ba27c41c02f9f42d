// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! GitHub identity provider.
//!
//! - Authorization: `https://github.com/login/oauth/authorize`
//! - Token exchange: `https://github.com/login/oauth/access_token`
//! - Profile: `GET https://api.github.com/user`
//! - Repository permissions: `GET https://api.github.com/repos/{owner}/{repo}`

use std::time::Duration;

use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::provider::{IdentityProvider, ProviderError, ProviderProfile, RepoRef, TokenGrant};

const GITHUB_AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_API_URL: &str = "https://api.github.com";

/// `read:user` for the profile, `repo` for private repository permissions.
const GITHUB_SCOPES: &[&str] = &["read:user", "repo"];

/// Upper bound on every provider round trip.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("auth-gateway/", env!("CARGO_PKG_VERSION"));

type GitHubClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// OAuth application credentials registered with GitHub.
#[derive(Clone)]
pub struct GitHubSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

pub struct GitHubProvider {
    oauth: GitHubClient,
    http: reqwest::Client,
    api_base: Url,
}

impl GitHubProvider {
    pub fn new(settings: &GitHubSettings) -> Result<Self, ProviderError> {
        let invalid = |what: &str, e: url::ParseError| ProviderError::Configuration(format!("invalid {what}: {e}"));

        let oauth = BasicClient::new(ClientId::new(settings.client_id.clone()))
            .set_client_secret(ClientSecret::new(settings.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(GITHUB_AUTH_URL.to_string()).map_err(|e| invalid("auth URL", e))?)
            .set_token_uri(TokenUrl::new(GITHUB_TOKEN_URL.to_string()).map_err(|e| invalid("token URL", e))?)
            .set_redirect_uri(
                RedirectUrl::new(settings.redirect_uri.clone()).map_err(|e| invalid("redirect URI", e))?,
            );

        // Redirects are refused so a token response can never be bounced
        // to another host.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(PROVIDER_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("HTTP client error: {e}")))?;

        let api_base = Url::parse(GITHUB_API_URL).map_err(|e| invalid("API URL", e))?;

        Ok(Self { oauth, http, api_base })
    }

    fn api_url(&self, path: &str) -> Result<Url, ProviderError> {
        self.api_base
            .join(path)
            .map_err(|e| ProviderError::Unexpected(format!("bad API path {path}: {e}")))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: Url,
        access_token: &str,
    ) -> Result<(StatusCode, Option<T>), ProviderError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Ok((status, None));
        }
        let body = response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Unexpected(e.to_string()))?;
        Ok((status, Some(body)))
    }
}

/// GitHub reports granted scopes comma-separated in a single string.
fn normalize_scopes(scopes: Option<&Vec<Scope>>) -> Vec<String> {
    scopes
        .into_iter()
        .flatten()
        .flat_map(|scope| scope.split([',', ' ']))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn into_grant(response: BasicTokenResponse) -> TokenGrant {
    TokenGrant {
        access_token: response.access_token().secret().clone(),
        refresh_token: response.refresh_token().map(|t| t.secret().clone()),
        expires_in: response
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok()),
        scopes: normalize_scopes(response.scopes()),
    }
}

fn map_token_error<RE, TE>(e: RequestTokenError<RE, TE>) -> ProviderError
where
    RE: std::error::Error + 'static,
    TE: oauth2::ErrorResponse + 'static,
{
    match e {
        RequestTokenError::ServerResponse(err) => ProviderError::Rejected(err.to_string()),
        RequestTokenError::Request(err) => ProviderError::Request(err.to_string()),
        RequestTokenError::Parse(err, _) => ProviderError::Unexpected(err.to_string()),
        RequestTokenError::Other(msg) => ProviderError::Unexpected(msg),
    }
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: u64,
    login: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RepoPermissions {
    #[serde(default)]
    admin: bool,
    #[serde(default)]
    push: bool,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    #[serde(default)]
    permissions: Option<RepoPermissions>,
}

impl GitHubRepo {
    /// Write access: push or admin.
    fn grants_access(&self) -> bool {
        self.permissions
            .as_ref()
            .is_some_and(|p| p.push || p.admin)
    }
}

#[async_trait]
impl IdentityProvider for GitHubProvider {
    fn name(&self) -> &str {
        "github"
    }

    fn authorization_url(&self, state: &str) -> Url {
        let state = state.to_string();
        let mut request = self.oauth.authorize_url(|| CsrfToken::new(state));
        for scope in GITHUB_SCOPES {
            request = request.add_scope(Scope::new((*scope).to_string()));
        }
        let (url, _) = request.url();
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        let response = self
            .oauth
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(map_token_error)?;
        Ok(into_grant(response))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        let refresh_token = RefreshToken::new(refresh_token.to_string());
        let response = self
            .oauth
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http)
            .await
            .map_err(map_token_error)?;
        Ok(into_grant(response))
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let (status, user) = self
            .get_json::<GitHubUser>(self.api_url("/user")?, access_token)
            .await?;
        let user = user.ok_or_else(|| ProviderError::Rejected(format!("GET /user returned {status}")))?;

        Ok(ProviderProfile {
            provider_user_id: user.id.to_string(),
            login: user.login,
            name: user.name,
            email: user.email,
        })
    }

    async fn repo_access(&self, access_token: &str, repo: &RepoRef) -> Result<bool, ProviderError> {
        let url = self.api_url(&format!("/repos/{}/{}", repo.owner, repo.name))?;
        let (status, body) = self.get_json::<GitHubRepo>(url, access_token).await?;

        match (status, body) {
            (_, Some(repo)) => Ok(repo.grants_access()),
            // GitHub hides private repositories behind 404
            (StatusCode::NOT_FOUND | StatusCode::FORBIDDEN, None) => Ok(false),
            (StatusCode::UNAUTHORIZED, None) => Err(ProviderError::Rejected("access token rejected".into())),
            (status, None) => Err(ProviderError::Unexpected(format!("GET /repos returned {status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GitHubProvider {
        GitHubProvider::new(&GitHubSettings {
            client_id: "Iv1.client".into(),
            client_secret: "secret".into(),
            redirect_uri: "https://auth.example.com/oauth/github/callback".into(),
        })
        .unwrap()
    }

    #[test]
    fn authorization_url_carries_state_and_scopes() {
        let url = provider().authorization_url("nonce-123");
        assert!(url.as_str().starts_with(GITHUB_AUTH_URL));

        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["state"], "nonce-123");
        assert_eq!(params["client_id"], "Iv1.client");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], "read:user repo");
        assert_eq!(params["redirect_uri"], "https://auth.example.com/oauth/github/callback");
    }

    #[test]
    fn invalid_redirect_uri_is_a_configuration_error() {
        let result = GitHubProvider::new(&GitHubSettings {
            client_id: "id".into(),
            client_secret: "secret".into(),
            redirect_uri: "not a url".into(),
        });
        assert!(matches!(result, Err(ProviderError::Configuration(_))));
    }

    #[test]
    fn write_permission_grants_access() {
        let repo: GitHubRepo =
            serde_json::from_str(r#"{"permissions":{"admin":false,"push":true,"pull":true}}"#).unwrap();
        assert!(repo.grants_access());

        let repo: GitHubRepo =
            serde_json::from_str(r#"{"permissions":{"admin":false,"push":false,"pull":true}}"#).unwrap();
        assert!(!repo.grants_access());

        let repo: GitHubRepo = serde_json::from_str(r#"{"full_name":"a/b"}"#).unwrap();
        assert!(!repo.grants_access());
    }

    #[test]
    fn comma_separated_scopes_are_split() {
        let scopes = vec![Scope::new("repo,read:user".into())];
        assert_eq!(normalize_scopes(Some(&scopes)), vec!["repo", "read:user"]);
        assert!(normalize_scopes(None).is_empty());
    }
}
