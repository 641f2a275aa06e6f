//! HTTP plumbing shared by the auth and table endpoints
//!
//! Every request carries the project's `apikey` header and a bearer token
//! (the user's access token when one is available, the anon key otherwise).
//! Error bodies come in a few shapes depending on which service answered;
//! they are all folded into [`Error::Api`].

use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response as ReqwestResponse};
use serde::{de::DeserializeOwned, Deserialize};

use crate::config::BackendConfig;
use crate::{Error, Result};

/// Error body returned by the auth and REST services
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl ErrorBody {
    fn message(&self) -> Option<String> {
        self.error_description
            .clone()
            .or_else(|| self.msg.clone())
            .or_else(|| self.message.clone())
            .or_else(|| self.error.clone())
    }

    fn code(&self) -> Option<String> {
        match &self.code {
            Some(serde_json::Value::String(code)) => Some(code.clone()),
            _ => self.error_code.clone().or_else(|| self.error.clone()),
        }
    }
}

/// Thin wrapper around reqwest configured for one backend project
#[derive(Debug, Clone)]
pub struct RestClient {
    client: ReqwestClient,
    config: BackendConfig,
}

impl RestClient {
    /// Create a new client
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client, config })
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Absolute URL for a path like `/auth/v1/signup`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.url, path)
    }

    /// Start a request with the project headers applied
    pub fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> RequestBuilder {
        let token = bearer.unwrap_or(&self.config.anon_key);
        self.client
            .request(method, self.url(path))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(token)
    }

    /// Send a request and decode a JSON body
    pub async fn send_json<T>(&self, request: RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = Self::check(request.send().await?).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Send a request whose success body is irrelevant
    pub async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        Self::check(request.send().await?).await?;
        Ok(())
    }

    async fn check(response: ReqwestResponse) -> Result<ReqwestResponse> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(api_error(status.as_u16(), &body))
    }
}

/// Build an [`Error::Api`] from a status and raw error body
pub(crate) fn api_error(status: u16, body: &str) -> Error {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.message().unwrap_or_else(|| {
        if body.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        }
    });

    Error::Api { status, code: parsed.code(), message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gotrue_error_body() {
        let err = api_error(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        match err {
            Error::Api { status, code, message } => {
                assert_eq!(status, 400);
                assert_eq!(code.as_deref(), Some("invalid_grant"));
                assert_eq!(message, "Invalid login credentials");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_newer_gotrue_error_body() {
        let err = api_error(
            422,
            r#"{"code":422,"error_code":"user_already_exists","msg":"User already registered"}"#,
        );
        match err {
            Error::Api { code, message, .. } => {
                assert_eq!(code.as_deref(), Some("user_already_exists"));
                assert_eq!(message, "User already registered");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_postgrest_error_body() {
        let err = api_error(
            406,
            r#"{"code":"PGRST116","details":"The result contains 0 rows","message":"JSON object requested, multiple (or no) rows returned"}"#,
        );
        match err {
            Error::Api { status, code, .. } => {
                assert_eq!(status, 406);
                assert_eq!(code.as_deref(), Some("PGRST116"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_body() {
        assert_eq!(api_error(502, "").provider_message(), "HTTP 502");
        assert_eq!(api_error(502, "bad gateway").provider_message(), "HTTP 502: bad gateway");
    }

    #[test]
    fn test_url_join() {
        let client = RestClient::new(BackendConfig::new("https://demo.supabase.co", "k")).unwrap();
        assert_eq!(client.url("/auth/v1/signup"), "https://demo.supabase.co/auth/v1/signup");
    }
}
