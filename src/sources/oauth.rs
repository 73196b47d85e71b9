use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl,
    RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
};

use super::SourceError;
use crate::models::{Credentials, Platform};

pub const YOUTUBE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const YOUTUBE_TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v3/token";
pub const TWITCH_AUTH_URL: &str = "https://id.twitch.tv/oauth2/authorize";
pub const TWITCH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Configured OAuth clients; a platform without credentials is `None`.
#[derive(Clone, Debug, Default)]
pub struct OAuthClients {
    pub youtube: Option<BasicClient>,
    pub twitch: Option<BasicClient>,
}

impl OAuthClients {
    pub fn get(&self, platform: Platform) -> Option<&BasicClient> {
        match platform {
            Platform::YouTube => self.youtube.as_ref(),
            Platform::Twitch => self.twitch.as_ref(),
        }
    }
}

/// Result of a code exchange or a refresh.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenGrant {
    pub fn into_credentials(self, channel_id: String) -> Credentials {
        Credentials {
            channel_id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
        }
    }

    /// Applies a refresh result on top of existing credentials. Providers
    /// that do not rotate refresh tokens keep the previous one.
    pub fn merge_into(self, previous: &Credentials) -> Credentials {
        Credentials {
            channel_id: previous.channel_id.clone(),
            access_token: self.access_token,
            refresh_token: self.refresh_token.or_else(|| previous.refresh_token.clone()),
            expires_at: self.expires_at,
        }
    }
}

impl From<BasicTokenResponse> for TokenGrant {
    fn from(token: BasicTokenResponse) -> Self {
        TokenGrant {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            expires_at: calculate_token_expiry(token.expires_in()),
        }
    }
}

#[tracing::instrument(name = "Build OAuth client", skip(client_id, client_secret))]
pub fn build_oauth_client(
    platform: Platform,
    client_id: String,
    client_secret: String,
    redirect_url: String,
) -> Result<BasicClient, url::ParseError> {
    tracing::info!("Building {} OAuth client", platform);

    let (auth_url, token_url) = match platform {
        Platform::YouTube => (YOUTUBE_AUTH_URL, YOUTUBE_TOKEN_URL),
        Platform::Twitch => (TWITCH_AUTH_URL, TWITCH_TOKEN_URL),
    };

    tracing::debug!("Using {} redirect URL: {}", platform, redirect_url);

    let client = BasicClient::new(
        ClientId::new(client_id),
        Some(ClientSecret::new(client_secret)),
        AuthUrl::new(auth_url.to_string())?,
        Some(TokenUrl::new(token_url.to_string())?),
    )
    .set_redirect_uri(RedirectUrl::new(redirect_url)?);

    // Twitch expects the client credentials in the form body
    Ok(match platform {
        Platform::Twitch => client.set_auth_type(AuthType::RequestBody),
        Platform::YouTube => client,
    })
}

/// Authorization URL plus the `state` value the callback must echo back.
#[tracing::instrument(name = "Generate OAuth authorization URL", skip(client))]
pub fn generate_auth_url(client: &BasicClient, platform: Platform) -> (String, String) {
    let mut auth_request = client.authorize_url(CsrfToken::new_random);

    match platform {
        Platform::YouTube => {
            auth_request = auth_request
                .add_scope(Scope::new(
                    "https://www.googleapis.com/auth/youtube.readonly".to_string(),
                ))
                .add_extra_param("prompt", "consent")
                .add_extra_param("access_type", "offline");
        }
        Platform::Twitch => {
            auth_request = auth_request.add_scope(Scope::new("user:read:follows".to_string()));
        }
    }

    let (auth_url, csrf_token) = auth_request.url();
    (auth_url.to_string(), csrf_token.secret().clone())
}

#[tracing::instrument(name = "Exchange authorization code", skip(client, code))]
pub async fn exchange_code(client: &BasicClient, code: String) -> Result<TokenGrant, SourceError> {
    let token = client
        .exchange_code(AuthorizationCode::new(code))
        .request_async(async_http_client)
        .await
        .map_err(map_token_error)?;

    tracing::info!("Successfully exchanged authorization code for token");
    Ok(token.into())
}

#[tracing::instrument(name = "Refresh OAuth token", skip(client, refresh_token))]
pub async fn refresh(client: &BasicClient, refresh_token: &str) -> Result<TokenGrant, SourceError> {
    let token = client
        .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
        .request_async(async_http_client)
        .await
        .map_err(map_token_error)?;

    tracing::info!("Successfully renewed access token");
    Ok(token.into())
}

fn map_token_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> SourceError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(server_response) => {
            tracing::error!(
                error = ?server_response.error(),
                description = ?server_response.error_description(),
                "Token endpoint rejected the request"
            );
            if matches!(server_response.error(), BasicErrorResponseType::InvalidGrant) {
                return SourceError::AuthExpired;
            }
            SourceError::Upstream(anyhow::anyhow!(
                "token endpoint error: {:?}",
                server_response.error()
            ))
        }
        RequestTokenError::Request(request_error) => {
            tracing::error!("Request error during token exchange: {:?}", request_error);
            SourceError::Upstream(anyhow::anyhow!("token request failed: {}", request_error))
        }
        RequestTokenError::Parse(parse_error, response) => {
            tracing::error!(
                "Parse error: {:?}, Response: {:?}",
                parse_error,
                String::from_utf8_lossy(&response)
            );
            SourceError::MalformedPayload(parse_error.to_string())
        }
        other => {
            tracing::error!("Unexpected OAuth error: {:?}", other);
            SourceError::Upstream(anyhow::anyhow!("unexpected OAuth error: {}", other))
        }
    }
}

pub fn calculate_token_expiry(expires_in: Option<std::time::Duration>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| {
        let seconds = i64::try_from(secs.as_secs()).unwrap_or(i64::MAX / 1000);
        Utc::now() + Duration::seconds(seconds)
    })
}
