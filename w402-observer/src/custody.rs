//! Key custody backends selected by configuration.
//!
//! [`HttpCustody`] delegates signing to a remote custody service; local keys
//! go through [`w402_svm::LocalCustody`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use w402::encoding::to_base64;
use w402_svm::{CustodyError, KeyCustody, LocalCustody};

use crate::config::{ConfigError, CustodyConfig};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    pubkey: String,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signature: String,
}

/// Custody client for a service exposing `POST {url}/sign`.
///
/// The request body is `{ "pubkey": <base58>, "message": <base64> }` and the
/// service answers `{ "signature": <base58> }`.
#[derive(Clone)]
pub struct HttpCustody {
    client: Client,
    sign_url: Url,
    pubkey: Pubkey,
    token: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpCustody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCustody")
            .field("sign_url", &self.sign_url.as_str())
            .field("pubkey", &self.pubkey)
            .field("has_token", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpCustody {
    /// Creates a client for the custody service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the sign URL cannot be built.
    pub fn new(client: Client, base_url: &Url, pubkey: Pubkey) -> Result<Self, ConfigError> {
        let sign_url = w402::discovery::directory_url(base_url)
            .join("sign")
            .map_err(|e| ConfigError::Invalid(format!("custody url: {e}")))?;
        Ok(Self {
            client,
            sign_url,
            pubkey,
            token: None,
            timeout: Duration::from_secs(10),
        })
    }

    /// Sends a bearer token with every request.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

#[async_trait]
impl KeyCustody for HttpCustody {
    fn pubkey(&self) -> Pubkey {
        self.pubkey
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, CustodyError> {
        let encoded = to_base64(message);
        let mut request = self
            .client
            .post(self.sign_url.clone())
            .timeout(self.timeout)
            .json(&SignRequest {
                pubkey: self.pubkey.to_string(),
                message: &encoded,
            });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| CustodyError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CustodyError::Refused(format!("{status}: {body}")));
        }
        let body: SignResponse = response
            .json()
            .await
            .map_err(|e| CustodyError::Transport(e.to_string()))?;
        Signature::from_str(&body.signature)
            .map_err(|e| CustodyError::Transport(format!("malformed signature: {e}")))
    }
}

/// Parses a secret key given as base58 or as a JSON byte array.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the key material is malformed.
pub fn parse_keypair(secret: &str) -> Result<Keypair, ConfigError> {
    let secret = secret.trim();
    let bytes = if secret.starts_with('[') {
        serde_json::from_str::<Vec<u8>>(secret)
            .map_err(|e| ConfigError::Invalid(format!("secret key array: {e}")))?
    } else {
        bs58::decode(secret)
            .into_vec()
            .map_err(|e| ConfigError::Invalid(format!("secret key base58: {e}")))?
    };
    Keypair::try_from(bytes.as_slice())
        .map_err(|e| ConfigError::Invalid(format!("secret key: {e}")))
}

/// Builds the configured custody backend.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for malformed keys or URLs.
pub fn from_config(client: &Client, config: &CustodyConfig) -> Result<Arc<dyn KeyCustody>, ConfigError> {
    match config {
        CustodyConfig::Local { secret_key } => {
            if secret_key.trim().starts_with('$') {
                return Err(ConfigError::Invalid(
                    "solana.custody.secret_key not resolved (missing env var?)".to_owned(),
                ));
            }
            Ok(Arc::new(LocalCustody::new(parse_keypair(secret_key)?)))
        }
        CustodyConfig::Remote { url, pubkey, token } => {
            let pubkey = Pubkey::from_str(pubkey)
                .map_err(|e| ConfigError::Invalid(format!("custody pubkey: {e}")))?;
            Ok(Arc::new(
                HttpCustody::new(client.clone(), url, pubkey)?.with_token(token.clone()),
            ))
        }
    }
}
