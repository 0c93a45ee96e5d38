//! HTTP token endpoint fetcher (OAuth2 token endpoints, instance metadata servers).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use reqwest::{header::AUTHORIZATION as AUTHORIZATION_HEADER, Client, Method};
use serde_json::Value;
use tracing::debug;

use crate::cache::token::AccessToken;
use crate::config::settings::RetryConfig;
use crate::error::ResourceError;
use crate::parameter::{Parameter, ParameterSet};
use crate::resilience::retry::RetrySettings;
use crate::resource::Resource;
use crate::sources::fetch::ResourceFetcher;
use crate::utils::constants::{DEFAULT_EXPIRES_IN_FIELD, DEFAULT_TOKEN_FIELD};

/// Token endpoint URL
pub static TOKEN_URL: Lazy<Parameter<String>> = Lazy::new(|| Parameter::required("token_url"));
/// HTTP method, GET or POST
pub static METHOD: Lazy<Parameter<String>> =
    Lazy::new(|| Parameter::optional("method").with_default("GET".to_string()));
/// Value of the Authorization header sent to the endpoint
pub static AUTHORIZATION: Lazy<Parameter<String>> =
    Lazy::new(|| Parameter::optional("authorization").sensitive());
/// JSON field holding the token
pub static TOKEN_FIELD: Lazy<Parameter<String>> =
    Lazy::new(|| Parameter::optional("token_field").with_default(DEFAULT_TOKEN_FIELD.to_string()));
/// JSON field holding the token lifetime in seconds. Without it the token is read as a JWT.
pub static EXPIRES_IN_FIELD: Lazy<Parameter<String>> = Lazy::new(|| {
    Parameter::optional("expires_in_field").with_default(DEFAULT_EXPIRES_IN_FIELD.to_string())
});
pub static FETCH_ATTEMPTS: Lazy<Parameter<u32>> =
    Lazy::new(|| Parameter::optional("fetch_attempts").with_default(1));

#[derive(Debug, Clone)]
pub struct HttpTokenFetcher {
    client: Client,
    retry: RetryConfig,
}

impl HttpTokenFetcher {
    pub fn new(client: Client) -> Self {
        Self { client, retry: RetryConfig::default() }
    }

    /// Backoff between attempts when `fetch_attempts` is above one.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_once(&self, request: &TokenRequest) -> Result<AccessToken> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        if let Some(authorization) = &request.authorization {
            builder = builder.header(AUTHORIZATION_HEADER, authorization);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("HTTP request failed: {}", response.status()));
        }
        let body: Value = response
            .json()
            .await
            .context("token response is not valid JSON")?;

        let value = body
            .get(&request.token_field)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("token response has no string field '{}'", request.token_field))?;

        match body.get(&request.expires_in_field).and_then(parse_seconds) {
            Some(seconds) => {
                debug!("token expires in {} seconds", seconds);
                Ok(AccessToken::expiring_in(value, Duration::from_secs(seconds)))
            }
            None => AccessToken::from_jwt(value).with_context(|| {
                format!(
                    "token response has no '{}' and the token is not a JWT",
                    request.expires_in_field
                )
            }),
        }
    }
}

/// Endpoint description resolved from the parameter set once per fetch,
/// so configuration errors surface before any attempt is made.
struct TokenRequest {
    url: String,
    method: Method,
    authorization: Option<String>,
    token_field: String,
    expires_in_field: String,
    attempts: u32,
}

impl TokenRequest {
    fn from_parameters(parameters: &ParameterSet) -> std::result::Result<Self, ResourceError> {
        let method = parameters.get_required(&METHOD)?;
        let method = method
            .to_uppercase()
            .parse::<Method>()
            .map_err(|_| ResourceError::configuration(format!("invalid HTTP method '{}'", method)))?;
        Ok(Self {
            url: parameters.get_required(&TOKEN_URL)?,
            method,
            authorization: parameters.get(&AUTHORIZATION),
            token_field: parameters.get_required(&TOKEN_FIELD)?,
            expires_in_field: parameters.get_required(&EXPIRES_IN_FIELD)?,
            attempts: parameters.get_required(&FETCH_ATTEMPTS)?,
        })
    }
}

/// Lifetimes arrive as numbers or as numeric strings.
fn parse_seconds(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

impl ResourceFetcher<AccessToken> for HttpTokenFetcher {
    async fn fetch(&self, parameters: &ParameterSet) -> Result<Resource<AccessToken>> {
        let request = TokenRequest::from_parameters(parameters)?;
        let retry = RetrySettings::new(request.attempts, &self.retry);
        retry
            .run_with_retry(|| self.fetch_once(&request))
            .await
            .map(AccessToken::into_resource)
    }
}
