//! Payment provider boundary.
//!
//! Three operations, each normalized to a small result type. The critical
//! rule lives in [`Gateway::verify_transfer`]: a transport failure or an
//! ambiguous response is reported as [`TransferStatus::Pending`], never as
//! a failure, because funds may have actually moved. Only the provider
//! explicitly confirming failure may release a hold.

use std::future::Future;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

use stonerace_types::BankRecipient;

/// Normalized outcome of a transfer verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    /// Provider confirmed the money arrived.
    Settled,
    /// Unknown: still processing, transport failure, or ambiguous reply.
    Pending,
    /// Provider confirmed the transfer did not and will not happen.
    Failed(String),
}

/// Receipt for an initiated transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferHandle {
    pub provider_ref: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("provider transport: {0}")]
    Transport(String),
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

pub trait Gateway: Clone + Send + Sync + 'static {
    /// Ask the provider to move `amount` to `recipient`. The idempotency
    /// key is the dedup token: the provider returns the same transfer for
    /// a repeated key, so retrying a failed call is safe.
    fn initiate_transfer(
        &self,
        amount: u64,
        recipient: BankRecipient,
        idempotency_key: String,
    ) -> impl Future<Output = Result<TransferHandle, GatewayError>> + Send;

    /// Check on a previously initiated transfer.
    fn verify_transfer(&self, provider_ref: String)
        -> impl Future<Output = TransferStatus> + Send;

    /// Resolve the holder name of a bank account before accepting it as a
    /// withdrawal destination.
    fn resolve_account(
        &self,
        account_number: String,
        bank_code: String,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send;
}

#[derive(Deserialize)]
struct TransferResponse {
    status: String,
    reference: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct VerifyResponse {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct ResolveResponse {
    account_name: String,
}

/// JSON HTTP implementation of the provider API.
#[derive(Clone)]
pub struct HttpGateway {
    base: Url,
    secret: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base: Url, secret: String) -> Self {
        Self {
            base,
            secret,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base
            .join(path)
            .map_err(|err| GatewayError::InvalidResponse(err.to_string()))
    }
}

impl Gateway for HttpGateway {
    async fn initiate_transfer(
        &self,
        amount: u64,
        recipient: BankRecipient,
        idempotency_key: String,
    ) -> Result<TransferHandle, GatewayError> {
        let url = self.endpoint("transfer")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.secret)
            .json(&serde_json::json!({
                "amount": amount,
                "reference": idempotency_key,
                "recipient": {
                    "account_number": recipient.account_number,
                    "bank_code": recipient.bank_code,
                    "account_name": recipient.account_name,
                },
            }))
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::Rejected(format!("http {}", response.status())));
        }
        let body: TransferResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::InvalidResponse(err.to_string()))?;
        match body.status.as_str() {
            "success" | "pending" => Ok(TransferHandle {
                provider_ref: body.reference,
            }),
            other => Err(GatewayError::Rejected(
                body.reason.unwrap_or_else(|| other.to_string()),
            )),
        }
    }

    async fn verify_transfer(&self, provider_ref: String) -> TransferStatus {
        let url = match self.endpoint(&format!("transfer/verify/{provider_ref}")) {
            Ok(url) => url,
            Err(err) => {
                warn!(%provider_ref, error = %err, "bad verify url, treating as pending");
                return TransferStatus::Pending;
            }
        };
        let response = match self.client.get(url).bearer_auth(&self.secret).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(%provider_ref, error = %err, "verify transport failure, treating as pending");
                return TransferStatus::Pending;
            }
        };
        // An HTTP error says nothing about the transfer itself.
        if !response.status().is_success() {
            warn!(%provider_ref, status = %response.status(), "verify http error, treating as pending");
            return TransferStatus::Pending;
        }
        let body: VerifyResponse = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                warn!(%provider_ref, error = %err, "unparseable verify body, treating as pending");
                return TransferStatus::Pending;
            }
        };
        match body.status.as_str() {
            "success" => TransferStatus::Settled,
            "failed" | "reversed" => TransferStatus::Failed(
                body.reason
                    .unwrap_or_else(|| "provider reported failure".to_string()),
            ),
            _ => TransferStatus::Pending,
        }
    }

    async fn resolve_account(
        &self,
        account_number: String,
        bank_code: String,
    ) -> Result<String, GatewayError> {
        let mut url = self.endpoint("bank/resolve")?;
        url.query_pairs_mut()
            .append_pair("account_number", &account_number)
            .append_pair("bank_code", &bank_code);
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.secret)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::Rejected(format!("http {}", response.status())));
        }
        let body: ResolveResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::InvalidResponse(err.to_string()))?;
        Ok(body.account_name)
    }
}
