#![deny(clippy::all, clippy::pedantic)]

use std::fs;

use chirp_api_types::{RpcEnvelope, RpcErrorShape};
use reqwest::{Client, RequestBuilder, Url, header::AUTHORIZATION};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::args::Cli;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("site URL is required (use --site or CHIRP_SITE_URL)")]
    MissingSite,
    #[error("a session token is required (use --token-file or CHIRP_SESSION_TOKEN)")]
    MissingToken,
    #[error("failed to read token file: {0}")]
    TokenFile(std::io::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{code}: {message}")]
    Rpc { code: String, message: String },
    #[error("server error: {0}")]
    Server(String),
}

impl From<RpcErrorShape> for CliError {
    fn from(shape: RpcErrorShape) -> Self {
        let field_message = shape
            .data
            .validation_error
            .as_ref()
            .and_then(|issues| issues.field_errors.values().flatten().next().cloned());
        Self::Rpc {
            code: shape.data.code.as_str().to_string(),
            message: field_message.unwrap_or(shape.message),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ctx {
    pub client: Client,
    pub base: Url,
    pub token: Option<String>,
}

impl Ctx {
    pub fn new(site: &str, token: Option<String>) -> Result<Self, CliError> {
        let base = Url::parse(site)?.join("/")?;
        let client = Client::builder().user_agent(Self::user_agent()).build()?;
        Ok(Self {
            client,
            base,
            token,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("chirp-cli/", env!("CARGO_PKG_VERSION"))
    }

    pub fn url(&self, path: &str) -> Result<Url, CliError> {
        self.base
            .join(&format!("api/rpc/{path}"))
            .map_err(CliError::Url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Call a query procedure: `GET /api/rpc/{path}?input=<json>`.
    pub async fn query<I: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        input: Option<&I>,
    ) -> Result<T, CliError> {
        let mut url = self.url(path)?;
        if let Some(input) = input {
            let encoded = serde_json::to_string(input)
                .map_err(|e| CliError::Server(format!("failed to encode input: {e}")))?;
            url.query_pairs_mut().append_pair("input", &encoded);
        }
        let request = self.authorize(self.client.get(url));
        Self::handle(request).await
    }

    /// Call a mutation procedure: `POST /api/rpc/{path}` with a JSON body.
    pub async fn mutate<I: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        input: &I,
    ) -> Result<T, CliError> {
        if self.token.is_none() {
            return Err(CliError::MissingToken);
        }
        let request = self.authorize(self.client.post(self.url(path)?).json(input));
        Self::handle(request).await
    }

    async fn handle<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, CliError> {
        let resp = request.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        match serde_json::from_slice::<RpcEnvelope<T>>(&bytes) {
            Ok(envelope) => envelope.into_result().map_err(CliError::from),
            Err(e) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                Err(CliError::Server(format!(
                    "status {status}: unexpected body ({e}): {text}"
                )))
            }
        }
    }
}

pub fn build_ctx_from_cli(cli: &Cli) -> Result<Ctx, CliError> {
    let site = cli.site.clone().ok_or(CliError::MissingSite)?;
    let token = if let Some(path) = &cli.token_file {
        Some(
            fs::read_to_string(path)
                .map_err(CliError::TokenFile)?
                .trim()
                .to_string(),
        )
    } else {
        cli.token_env.clone()
    };

    Ctx::new(&site, token.filter(|token| !token.is_empty()))
}
