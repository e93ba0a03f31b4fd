//! Mandate enforcement for payment requests.
//!
//! Flow for [`MandateEnforcer::enforce`]:
//! 1. Resolve the agent's active intent (or ask a human for one)
//! 2. Verify the intent against the request
//! 3. Resolve the cart: presented by id, or approved by a human
//! 4. Verify the cart, then resolve the payment mandate the same way
//! 5. Verify the whole chain and persist it atomically
//!
//! A request is either fully authorised or rejected; nothing is stored for
//! a rejected request.

use crate::approval::{
    ApprovalError, ApprovalGate, ApprovalOutcome, ApprovalStage, GateError, HumanApprovalService,
};
use crate::audit::AuditLogger;
use crate::config::EnforcerConfig;
use crate::payment::{
    Payment, PaymentResponse, CART_MANDATE_ID_KEY, INTENT_MANDATE_ID_KEY, PAYMENT_MANDATE_ID_KEY,
};
use crate::repository::{MandateRepository, StoreError};
use ap2_mandate::crypto::jcs;
use ap2_mandate::events::{
    mandate_rejected_event, mandate_revoked_event, mandate_verified_event,
    payment_authorized_event, MandateRejectedPayload, MandateRevokedPayload,
    MandateVerifiedPayload, PaymentAuthorizedPayload, DEFAULT_EVENT_SOURCE,
};
use ap2_mandate::{
    AuditEvent, CartMandate, ChainAuthorization, Ed25519SignatureService, IntentMandate,
    MandateEvent, MandateKind, MandateVerifier, MandateViolation, PaymentMandate,
    PaymentRequest, SignatureService, ViolationKind,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Debug, Error)]
pub enum EnforceError {
    #[error(transparent)]
    Violation(#[from] MandateViolation),

    #[error("no {stage} mandate obtained: approval {outcome}")]
    NoMandate {
        stage: ApprovalStage,
        outcome: ApprovalOutcome,
    },

    #[error("mandate store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

impl From<GateError> for EnforceError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::NoMandate { stage, outcome } => Self::NoMandate { stage, outcome },
            GateError::Service(e) => Self::Approval(e),
        }
    }
}

impl EnforceError {
    /// Only an approval timeout may succeed on a fresh attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoMandate {
                outcome: ApprovalOutcome::TimedOut,
                ..
            }
        )
    }

    /// Violation kind, for errors that are a verdict on the request.
    pub fn violation_kind(&self) -> Option<ViolationKind> {
        match self {
            Self::Violation(v) => Some(v.violation_type),
            Self::NoMandate { .. } => Some(ViolationKind::MandateNotFound),
            Self::Store(_) | Self::Approval(_) => None,
        }
    }
}

/// Where a mandate of the chain came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Stored,
    Approved,
}

/// Checks payment requests against stored or freshly approved mandates.
pub struct MandateEnforcer {
    repository: Arc<dyn MandateRepository>,
    verifier: MandateVerifier,
    approvals: ApprovalGate,
    audit: Option<Arc<dyn AuditLogger>>,
    audit_signer: Option<(Arc<dyn SignatureService>, String)>,
    event_source: String,
}

impl MandateEnforcer {
    pub fn new(
        repository: Arc<dyn MandateRepository>,
        verifier: MandateVerifier,
        approvals: ApprovalGate,
    ) -> Self {
        Self {
            repository,
            verifier,
            approvals,
            audit: None,
            audit_signer: None,
            event_source: DEFAULT_EVENT_SOURCE.to_string(),
        }
    }

    /// Wire an enforcer from configuration: trusted keys, store, audit sink.
    ///
    /// Fails when an audit signing key is configured but cannot be loaded.
    pub fn from_config(
        config: &EnforcerConfig,
        signatures: Arc<Ed25519SignatureService>,
        approvals: Arc<dyn HumanApprovalService>,
    ) -> anyhow::Result<Self> {
        config.load_trusted_keys(&signatures)?;
        let audit_key_id = config.load_audit_signing_key(&signatures)?;
        let repository = Arc::new(config.open_repository()?);
        let mut enforcer = Self::new(
            repository,
            MandateVerifier::new(signatures.clone()),
            ApprovalGate::new(approvals, config.approval_timeout()),
        );
        if let Some(logger) = config.open_audit_logger()? {
            enforcer = enforcer.with_audit_logger(Arc::new(logger));
        }
        if let Some(key_id) = audit_key_id {
            enforcer = enforcer.with_audit_signer(signatures, key_id);
        }
        Ok(enforcer)
    }

    pub fn with_audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(logger);
        self
    }

    /// Sign authorisation records with `key_id`.
    pub fn with_audit_signer(
        mut self,
        signer: Arc<dyn SignatureService>,
        key_id: impl Into<String>,
    ) -> Self {
        self.audit_signer = Some((signer, key_id.into()));
        self
    }

    pub fn with_event_source(mut self, source: impl Into<String>) -> Self {
        self.event_source = source.into();
        self
    }

    pub fn repository(&self) -> &Arc<dyn MandateRepository> {
        &self.repository
    }

    pub fn verifier(&self) -> &MandateVerifier {
        &self.verifier
    }

    /// Authorise `request` or explain why not.
    pub async fn enforce(
        &self,
        request: &PaymentRequest,
    ) -> Result<ChainAuthorization, EnforceError> {
        self.enforce_at(Utc::now(), request).await
    }

    /// [`MandateEnforcer::enforce`] with an explicit verification time.
    pub async fn enforce_at(
        &self,
        now: DateTime<Utc>,
        request: &PaymentRequest,
    ) -> Result<ChainAuthorization, EnforceError> {
        let span = info_span!(
            "enforce",
            request_ref = request.reference(),
            agent = %request.requesting_agent_id,
            merchant = %request.receiving_agent_id,
        );

        async {
            let result = self.run(now, request).await;
            match &result {
                Ok(authorization) => {
                    info!(
                        payment_mandate_id = %authorization.payment_mandate_id,
                        amount = %authorization.amount,
                        "payment authorized"
                    );
                    self.audit_authorized(authorization, request);
                }
                Err(EnforceError::Violation(violation)) => {
                    self.audit_rejected(violation, request, now);
                }
                Err(e @ EnforceError::NoMandate { .. }) => {
                    warn!(error = %e, "payment not authorized");
                    self.audit_no_mandate(e, request, now);
                }
                Err(e) => warn!(error = %e, "payment not authorized"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        now: DateTime<Utc>,
        request: &PaymentRequest,
    ) -> Result<ChainAuthorization, EnforceError> {
        let (intent, intent_source) = match self.repository.find_active_intent_for_agent(
            &request.requesting_agent_id,
            &request.receiving_agent_id,
            now,
        )? {
            Some(intent) => (intent, Source::Stored),
            None => {
                debug!("no active intent, asking for approval");
                (self.approvals.intent(request).await?, Source::Approved)
            }
        };
        self.verifier.check_intent_mandate_at(now, &intent, request)?;

        let human_required =
            intent.requires_human_approval || self.approvals.is_human_approval_required(request);
        debug!(
            intent_mandate_id = intent.id(),
            human_required, "intent verified"
        );

        let presented_cart = if human_required {
            None
        } else {
            self.presented(request.cart_mandate_id.as_deref(), |id| {
                self.repository.find_cart_mandate(id)
            })?
        };
        let cart = match presented_cart {
            Some(cart) => cart,
            None => self.approvals.cart(&intent, request).await?,
        };
        self.verifier
            .check_cart_mandate_at(now, &cart, &intent, request)?;

        let presented_payment = if human_required {
            None
        } else {
            self.presented(request.payment_mandate_id.as_deref(), |id| {
                self.repository.find_payment_mandate(id)
            })?
        };
        let payment = match presented_payment {
            Some(payment) => payment,
            None => self.approvals.payment(&cart, request).await?,
        };

        let authorization = self
            .verifier
            .verify_chain_at(now, &intent, &cart, &payment, request)?;

        if intent_source == Source::Approved {
            self.repository.store_intent_mandate(&intent)?;
        }
        self.repository.store_chain(&cart, &payment)?;

        Ok(authorization)
    }

    /// Load a mandate the agent presented by id. Unknown or revoked ids are
    /// a `MandateNotFound` violation; no id means nothing was presented.
    fn presented<M>(
        &self,
        mandate_id: Option<&str>,
        find: impl FnOnce(&str) -> Result<Option<M>, StoreError>,
    ) -> Result<Option<M>, EnforceError> {
        let Some(mandate_id) = mandate_id else {
            return Ok(None);
        };
        if self.repository.is_revoked(mandate_id)? {
            return Err(MandateViolation::not_found(mandate_id, "mandate has been revoked").into());
        }
        match find(mandate_id)? {
            Some(mandate) => Ok(Some(mandate)),
            None => Err(MandateViolation::not_found(mandate_id, "mandate not found").into()),
        }
    }

    /// Would `request` be authorised right now?
    pub async fn check_payment_permission(&self, request: &PaymentRequest) -> bool {
        self.enforce(request).await.is_ok()
    }

    /// Does `request` verify against mandates already on record?
    ///
    /// Never asks a human and never writes.
    pub fn is_compliant(&self, request: &PaymentRequest) -> bool {
        self.is_compliant_at(Utc::now(), request)
    }

    pub fn is_compliant_at(&self, now: DateTime<Utc>, request: &PaymentRequest) -> bool {
        match self.stored_chain(now, request) {
            Ok(Some((intent, cart, payment))) => self
                .verifier
                .verify_chain_at(now, &intent, &cart, &payment, request)
                .is_ok(),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "compliance check failed");
                false
            }
        }
    }

    fn stored_chain(
        &self,
        now: DateTime<Utc>,
        request: &PaymentRequest,
    ) -> Result<Option<(IntentMandate, CartMandate, PaymentMandate)>, EnforceError> {
        let Some(intent) = self.repository.find_active_intent_for_agent(
            &request.requesting_agent_id,
            &request.receiving_agent_id,
            now,
        )?
        else {
            return Ok(None);
        };
        let cart = self.presented(request.cart_mandate_id.as_deref(), |id| {
            self.repository.find_cart_mandate(id)
        })?;
        let payment = self.presented(request.payment_mandate_id.as_deref(), |id| {
            self.repository.find_payment_mandate(id)
        })?;
        Ok(cart.zip(payment).map(|(cart, payment)| (intent, cart, payment)))
    }

    /// After-the-fact check that an executed payment was covered by a valid,
    /// unrevoked chain at the time it was created.
    ///
    /// The chain is found through the payment mandate whose
    /// `payment_reference` equals the payment id or, failing that, its
    /// external reference.
    pub fn audit_payment(&self, payment: &Payment) -> bool {
        match self.audit_payment_chain(payment) {
            Ok(Some(authorization)) => {
                debug!(
                    payment_id = %payment.id,
                    payment_mandate_id = %authorization.payment_mandate_id,
                    "payment audit passed"
                );
                true
            }
            Ok(None) => {
                warn!(payment_id = %payment.id, "no mandate chain on record for payment");
                false
            }
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "payment audit failed");
                false
            }
        }
    }

    fn audit_payment_chain(
        &self,
        payment: &Payment,
    ) -> Result<Option<ChainAuthorization>, EnforceError> {
        let mut references = vec![payment.id.as_str()];
        references.extend(payment.external_reference.as_deref());

        for reference in references {
            let Some(mandate) = self.repository.find_payment_mandate_for_payment(reference)?
            else {
                continue;
            };
            let cart = self.require_cart(&mandate.parent_cart_mandate_id)?;
            let intent = self.require_intent(&cart.parent_intent_mandate_id)?;
            for id in [intent.id(), cart.id(), mandate.id()] {
                if self.repository.is_revoked(id)? {
                    return Err(MandateViolation::not_found(id, "mandate has been revoked").into());
                }
            }

            let request = payment.to_request();
            let authorization = self.verifier.verify_chain_at(
                payment.created_at,
                &intent,
                &cart,
                &mandate,
                &request,
            )?;
            return Ok(Some(authorization));
        }
        Ok(None)
    }

    fn require_cart(&self, id: &str) -> Result<CartMandate, EnforceError> {
        self.repository
            .find_cart_mandate(id)?
            .ok_or_else(|| MandateViolation::not_found(id, "cart mandate not found").into())
    }

    fn require_intent(&self, id: &str) -> Result<IntentMandate, EnforceError> {
        self.repository
            .find_intent_mandate(id)?
            .ok_or_else(|| MandateViolation::not_found(id, "intent mandate not found").into())
    }

    /// Add the ids of the mandates that authorised `response.payment_id` to
    /// its `processor_data`. Returns `false` when no chain is on record.
    pub fn attach_mandate_info(&self, response: &mut PaymentResponse) -> Result<bool, StoreError> {
        let Some(payment) = self
            .repository
            .find_payment_mandate_for_payment(&response.payment_id)?
        else {
            return Ok(false);
        };
        let Some(cart) = self
            .repository
            .find_cart_mandate(&payment.parent_cart_mandate_id)?
        else {
            return Ok(false);
        };

        for (key, id) in [
            (INTENT_MANDATE_ID_KEY, cart.parent_intent_mandate_id.clone()),
            (CART_MANDATE_ID_KEY, cart.id().to_string()),
            (PAYMENT_MANDATE_ID_KEY, payment.id().to_string()),
        ] {
            response.processor_data.insert(key.to_string(), Value::from(id));
        }
        Ok(true)
    }

    /// Revoke a stored mandate and record it in the audit trail.
    pub fn revoke_mandate(&self, mandate_id: &str, reason: &str) -> Result<bool, StoreError> {
        let revoked = self.repository.revoke_mandate(mandate_id, reason)?;
        if revoked {
            let revoked_at = self.repository.revoked_at(mandate_id)?.unwrap_or_else(Utc::now);
            self.record(mandate_revoked_event(
                self.event_source.clone(),
                MandateRevokedPayload {
                    mandate_id: mandate_id.to_string(),
                    revoked_at,
                    reason: reason.to_string(),
                },
            ));
        }
        Ok(revoked)
    }

    fn audit_authorized(&self, authorization: &ChainAuthorization, request: &PaymentRequest) {
        for (mandate_id, kind) in [
            (&authorization.intent_mandate_id, MandateKind::Intent),
            (&authorization.cart_mandate_id, MandateKind::Cart),
            (&authorization.payment_mandate_id, MandateKind::Payment),
        ] {
            self.record(mandate_verified_event(
                self.event_source.clone(),
                MandateVerifiedPayload {
                    mandate_id: mandate_id.clone(),
                    mandate_kind: kind,
                    request_ref: request.reference().to_string(),
                    verified_at: authorization.verified_at,
                },
            ));
        }
        self.record(payment_authorized_event(
            self.event_source.clone(),
            PaymentAuthorizedPayload {
                authorization: authorization.clone(),
                request_ref: request.reference().to_string(),
            },
        ));
    }

    fn audit_rejected(
        &self,
        violation: &MandateViolation,
        request: &PaymentRequest,
        now: DateTime<Utc>,
    ) {
        self.record(mandate_rejected_event(
            self.event_source.clone(),
            MandateRejectedPayload::from_violation(violation, request.reference(), now),
        ));
    }

    /// Approval denial or timeout, recorded as a missing mandate. The
    /// mandate id is the one presented for that stage, if any.
    fn audit_no_mandate(
        &self,
        error: &EnforceError,
        request: &PaymentRequest,
        now: DateTime<Utc>,
    ) {
        let EnforceError::NoMandate { stage, .. } = error else {
            return;
        };
        let presented = match stage {
            ApprovalStage::Intent => None,
            ApprovalStage::Cart => request.cart_mandate_id.as_deref(),
            ApprovalStage::Payment => request.payment_mandate_id.as_deref(),
        };
        let violation =
            MandateViolation::not_found(presented.unwrap_or_default(), error.to_string());
        self.audit_rejected(&violation, request, now);
    }

    /// Append to the audit trail. Audit failures are logged, never fatal.
    fn record<T: Serialize>(&self, event: MandateEvent<T>) {
        let Some(logger) = &self.audit else {
            return;
        };
        let event = match event.into_audit_event() {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "failed to encode audit event");
                return;
            }
        };

        let result = match self.sign_event(&event) {
            Some((key_id, signature)) => logger.log_signed_event(&event, key_id, &signature),
            None => logger.log_event(&event),
        };
        if let Err(e) = result {
            warn!(event_type = %event.type_, error = %e, "audit write failed");
        }
    }

    fn sign_event(&self, event: &AuditEvent) -> Option<(&str, String)> {
        let (signer, key_id) = self.audit_signer.as_ref()?;
        let bytes = match jcs::to_vec(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to canonicalize audit event");
                return None;
            }
        };
        match signer.sign_detached(key_id, &bytes) {
            Ok(signature) => Some((key_id.as_str(), signature)),
            Err(e) => {
                warn!(key_id = %key_id, error = %e, "failed to sign audit event");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeouts_are_retryable() {
        let timed_out = EnforceError::NoMandate {
            stage: ApprovalStage::Cart,
            outcome: ApprovalOutcome::TimedOut,
        };
        let denied = EnforceError::NoMandate {
            stage: ApprovalStage::Cart,
            outcome: ApprovalOutcome::Denied,
        };
        let violation = EnforceError::Violation(MandateViolation::new(
            "cart-1",
            ViolationKind::ValueMismatch,
            "amount differs",
        ));

        assert!(timed_out.is_retryable());
        assert!(!denied.is_retryable());
        assert!(!violation.is_retryable());
        assert!(!EnforceError::Store(StoreError::Database("busy".into())).is_retryable());
    }

    #[test]
    fn test_violation_kind_of_errors() {
        let denied = EnforceError::from(GateError::NoMandate {
            stage: ApprovalStage::Payment,
            outcome: ApprovalOutcome::Denied,
        });
        assert_eq!(denied.violation_kind(), Some(ViolationKind::MandateNotFound));
        assert_eq!(denied.to_string(), "no payment mandate obtained: approval denied");

        let store = EnforceError::Store(StoreError::Database("locked".into()));
        assert_eq!(store.violation_kind(), None);
    }
}
