//! Runtime around the mandate verifier: persistent mandates, human approval,
//! audit trail and the [`MandateEnforcer`] that ties them together.

pub mod approval;
pub mod audit;
pub mod config;
pub mod enforcer;
pub mod payment;
pub mod repository;
pub mod schema;

pub use approval::{
    ApprovalError, ApprovalGate, ApprovalOutcome, ApprovalStage, HumanApprovalService,
    NoHumanApproval,
};
pub use audit::{AuditLogger, AuditRecord, MemoryAuditLogger, NdjsonAuditLogger};
pub use config::EnforcerConfig;
pub use enforcer::{EnforceError, MandateEnforcer};
pub use payment::{
    GuardedPaymentError, GuardedProcessor, Payment, PaymentProcessor, PaymentResponse,
    PaymentStatus, ProcessorError,
};
pub use repository::{MandateRepository, SqliteMandateRepository, StoreError};
