//! Human approval boundary.
//!
//! A human decides on their own schedule, so every request is wrapped in
//! [`ApprovalGate`], which bounds the wait with `tokio::time::timeout` and
//! turns denial or timeout into an explicit [`ApprovalOutcome`].

use ap2_mandate::{CartMandate, IntentMandate, PaymentMandate, PaymentRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default bound on one approval wait.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// The approval channel itself failed (not a human "no").
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval service unavailable: {0}")]
    Unavailable(String),
}

/// Asks a human to approve a cart or a payment.
///
/// `Ok(None)` means the human declined.
#[async_trait]
pub trait HumanApprovalService: Send + Sync {
    /// Ask for a fresh intent when the agent holds none. Declines by default.
    async fn request_intent_approval(
        &self,
        _request: &PaymentRequest,
    ) -> Result<Option<IntentMandate>, ApprovalError> {
        Ok(None)
    }

    async fn request_cart_approval(
        &self,
        intent: &IntentMandate,
        request: &PaymentRequest,
    ) -> Result<Option<CartMandate>, ApprovalError>;

    async fn request_payment_approval(
        &self,
        cart: &CartMandate,
        request: &PaymentRequest,
    ) -> Result<Option<PaymentMandate>, ApprovalError>;

    /// Whether this request must be approved by a human regardless of the
    /// mandates the agent presents.
    fn is_human_approval_required(&self, request: &PaymentRequest) -> bool;
}

/// Approval service that never approves anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHumanApproval;

#[async_trait]
impl HumanApprovalService for NoHumanApproval {
    async fn request_cart_approval(
        &self,
        _intent: &IntentMandate,
        _request: &PaymentRequest,
    ) -> Result<Option<CartMandate>, ApprovalError> {
        Ok(None)
    }

    async fn request_payment_approval(
        &self,
        _cart: &CartMandate,
        _request: &PaymentRequest,
    ) -> Result<Option<PaymentMandate>, ApprovalError> {
        Ok(None)
    }

    fn is_human_approval_required(&self, _request: &PaymentRequest) -> bool {
        false
    }
}

/// What was being approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStage {
    Intent,
    Cart,
    Payment,
}

impl ApprovalStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Cart => "cart",
            Self::Payment => "payment",
        }
    }
}

impl fmt::Display for ApprovalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why no mandate was obtained from a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Denied,
    TimedOut,
}

impl fmt::Display for ApprovalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied => f.write_str("denied"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Failure of one bounded approval wait.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("{stage} approval {outcome}")]
    NoMandate {
        stage: ApprovalStage,
        outcome: ApprovalOutcome,
    },

    #[error(transparent)]
    Service(#[from] ApprovalError),
}

/// Timeout-bounded access to a [`HumanApprovalService`].
#[derive(Clone)]
pub struct ApprovalGate {
    service: Arc<dyn HumanApprovalService>,
    timeout: Duration,
}

impl ApprovalGate {
    pub fn new(service: Arc<dyn HumanApprovalService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_human_approval_required(&self, request: &PaymentRequest) -> bool {
        self.service.is_human_approval_required(request)
    }

    pub async fn intent(&self, request: &PaymentRequest) -> Result<IntentMandate, GateError> {
        self.bounded(
            ApprovalStage::Intent,
            request,
            self.service.request_intent_approval(request),
        )
        .await
    }

    pub async fn cart(
        &self,
        intent: &IntentMandate,
        request: &PaymentRequest,
    ) -> Result<CartMandate, GateError> {
        self.bounded(
            ApprovalStage::Cart,
            request,
            self.service.request_cart_approval(intent, request),
        )
        .await
    }

    pub async fn payment(
        &self,
        cart: &CartMandate,
        request: &PaymentRequest,
    ) -> Result<PaymentMandate, GateError> {
        self.bounded(
            ApprovalStage::Payment,
            request,
            self.service.request_payment_approval(cart, request),
        )
        .await
    }

    async fn bounded<T>(
        &self,
        stage: ApprovalStage,
        request: &PaymentRequest,
        pending: impl Future<Output = Result<Option<T>, ApprovalError>>,
    ) -> Result<T, GateError> {
        info!(
            stage = stage.as_str(),
            request_ref = request.reference(),
            timeout_secs = self.timeout.as_secs(),
            "waiting for human approval"
        );

        let outcome = match tokio::time::timeout(self.timeout, pending).await {
            Ok(Ok(Some(mandate))) => return Ok(mandate),
            Ok(Ok(None)) => ApprovalOutcome::Denied,
            Ok(Err(e)) => {
                warn!(stage = stage.as_str(), error = %e, "approval service failed");
                return Err(e.into());
            }
            Err(_) => ApprovalOutcome::TimedOut,
        };

        warn!(
            stage = stage.as_str(),
            request_ref = request.reference(),
            outcome = %outcome,
            "no mandate obtained"
        );
        Err(GateError::NoMandate { stage, outcome })
    }
}
