use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    types::{OAuthConfig, TokenGrant, TokenValidation},
};

/// Token operations the session layer relies on.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Trade a refresh token for a new access/refresh pair.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;

    /// Ask the identity service how long an access token remains valid.
    async fn validate(&self, access_token: &str) -> Result<TokenValidation>;
}

/// Raw token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Vec<String>,
}

/// [`TokenExchange`] over HTTP (`grant_type=refresh_token` form post plus a
/// validate endpoint taking `Authorization: OAuth <token>`).
pub struct HttpTokenExchange {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl HttpTokenExchange {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(config: OAuthConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret().as_str()),
        ];

        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "token refresh rejected");
            return Err(Error::rejected(status.as_u16(), body));
        }

        let parsed: TokenResponse = resp.json().await?;
        parse_token_response(parsed, refresh_token)
    }

    async fn validate(&self, access_token: &str) -> Result<TokenValidation> {
        let resp = self
            .client
            .get(&self.config.validate_url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("OAuth {access_token}"),
            )
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            debug!("access token failed validation");
            return Err(Error::InvalidToken);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::rejected(status.as_u16(), body));
        }

        Ok(resp.json::<TokenValidation>().await?)
    }
}

fn parse_token_response(resp: TokenResponse, previous_refresh: &str) -> Result<TokenGrant> {
    if resp.access_token.is_empty() {
        return Err(Error::message("missing access_token in response"));
    }
    let expires_in = resp
        .expires_in
        .ok_or_else(|| Error::message("missing expires_in in response"))?;
    // Some providers omit the refresh token when it did not rotate.
    let refresh_token = resp
        .refresh_token
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| previous_refresh.to_string());

    Ok(TokenGrant {
        access_token: Secret::new(resp.access_token),
        refresh_token: Secret::new(refresh_token),
        expires_in,
        scopes: resp.scope,
    })
}
