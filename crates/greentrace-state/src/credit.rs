//! # Carbon Credit Lifecycle
//!
//! Two independent state machines run on every credit.
//!
//! ## Holding status
//!
//! ```text
//! Issued ──▶ Transferred ──▶ Retired (terminal)
//!    │                          ▲
//!    └──────────────────────────┘
//! ```
//!
//! ## Verification status
//!
//! ```text
//! Pending ──▶ Verified
//!    │
//!    └──────▶ Rejected
//! ```
//!
//! A verification decision is final. Every transition of either machine is
//! appended to the credit's transition log.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use greentrace_core::{CoreError, Viewer, WalletAddress, DEFAULT_NETWORK};

/// Digits after the decimal point an amount may carry.
pub const AMOUNT_SCALE: u32 = 2;
/// Exclusive upper bound on an amount (ten significant digits, two decimals).
pub const AMOUNT_LIMIT: i64 = 100_000_000;

const DEFAULT_UNIT: &str = "tonnes";
const MAX_UNIT: usize = 20;
const MAX_HASH: usize = 66;
const MAX_NETWORK: usize = 50;

// ─── States ──────────────────────────────────────────────────────────

/// Holding status of a credit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditStatus {
    #[default]
    Issued,
    Transferred,
    /// Terminal.
    Retired,
}

impl CreditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Transferred => "transferred",
            Self::Retired => "retired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Retired)
    }
}

impl std::fmt::Display for CreditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CreditStatus {
    type Err = CreditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issued" => Ok(Self::Issued),
            "transferred" => Ok(Self::Transferred),
            "retired" => Ok(Self::Retired),
            other => Err(CreditError::UnknownStatus(other.to_string())),
        }
    }
}

/// Third-party verification status of a credit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = CreditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            other => Err(CreditError::UnknownStatus(other.to_string())),
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors raised by credit construction and lifecycle transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CreditError {
    /// Attempted transition is not valid from the current status.
    #[error("invalid credit transition: {from} -> {to}")]
    InvalidTransition {
        from: CreditStatus,
        to: CreditStatus,
    },

    /// The credit has been retired.
    #[error("credit is in terminal state {state}")]
    TerminalState { state: CreditStatus },

    /// A verification decision has already been made.
    #[error("credit verification already decided: {status}")]
    AlreadyDecided { status: VerificationStatus },

    /// The verification decision was `pending`.
    #[error("verification decision must be verified or rejected")]
    InvalidDecision,

    /// Amount is not positive, too large, or has too many decimals.
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: &'static str },

    /// Transfers move the whole credit.
    #[error("transfer amount {requested} does not match credit amount {held}")]
    AmountMismatch { requested: Decimal, held: Decimal },

    /// A stored status string was not recognized.
    #[error("unknown credit status: {0}")]
    UnknownStatus(String),

    /// A field failed validation.
    #[error(transparent)]
    Validation(#[from] CoreError),
}

// ─── Transition log ──────────────────────────────────────────────────

/// Which machine moved, and between which states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "machine", rename_all = "snake_case")]
pub enum CreditTransition {
    Status {
        from: CreditStatus,
        to: CreditStatus,
    },
    Verification {
        from: VerificationStatus,
        to: VerificationStatus,
    },
}

/// Record of one credit transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransitionRecord {
    #[serde(flatten)]
    pub transition: CreditTransition,
    /// Profile that triggered the transition.
    pub actor: Uuid,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

// ─── Credit ──────────────────────────────────────────────────────────

/// Input for [`CarbonCredit::issue`].
#[derive(Debug, Clone, Default)]
pub struct NewCredit {
    pub amount: Decimal,
    pub unit: Option<String>,
    pub description: String,
    pub carbon_offset: String,
    pub blockchain_hash: String,
    pub blockchain_network: Option<String>,
}

/// A carbon credit with its lifecycle state and transition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarbonCredit {
    pub id: Uuid,
    pub amount: Decimal,
    pub unit: String,
    pub issuer: WalletAddress,
    /// Current holder. The issuer until the credit is transferred.
    pub recipient: WalletAddress,
    pub status: CreditStatus,
    pub verification_status: VerificationStatus,
    pub description: String,
    pub carbon_offset: String,
    pub blockchain_hash: String,
    pub blockchain_network: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transferred_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
    /// Retirement reason.
    pub reason: String,
    pub transitions: Vec<CreditTransitionRecord>,
}

/// Check an amount: positive, below [`AMOUNT_LIMIT`], at most two decimals.
pub fn validate_amount(amount: Decimal) -> Result<(), CreditError> {
    if amount <= Decimal::ZERO {
        return Err(CreditError::InvalidAmount {
            amount,
            reason: "must be positive",
        });
    }
    if amount >= Decimal::from(AMOUNT_LIMIT) {
        return Err(CreditError::InvalidAmount {
            amount,
            reason: "too large",
        });
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(CreditError::InvalidAmount {
            amount,
            reason: "at most two decimal places",
        });
    }
    Ok(())
}

fn check_len(value: &str, field: &'static str, max: usize) -> Result<(), CreditError> {
    if value.chars().count() > max {
        return Err(CoreError::FieldTooLong { field, max }.into());
    }
    Ok(())
}

impl CarbonCredit {
    /// Issue a credit held by `issuer`. Starts `issued` and `pending`.
    pub fn issue(input: NewCredit, issuer: &Viewer) -> Result<Self, CreditError> {
        validate_amount(input.amount)?;
        let unit = input
            .unit
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_UNIT.to_string());
        check_len(&unit, "unit", MAX_UNIT)?;
        check_len(&input.blockchain_hash, "blockchain_hash", MAX_HASH)?;
        let network = input
            .blockchain_network
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_NETWORK.to_string());
        check_len(&network, "blockchain_network", MAX_NETWORK)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            amount: input.amount.normalize(),
            unit,
            issuer: issuer.wallet.clone(),
            recipient: issuer.wallet.clone(),
            status: CreditStatus::Issued,
            verification_status: VerificationStatus::Pending,
            description: input.description,
            carbon_offset: input.carbon_offset,
            blockchain_hash: input.blockchain_hash,
            blockchain_network: network,
            created_by: issuer.profile_id,
            created_at: now,
            updated_at: now,
            transferred_at: None,
            retired_at: None,
            reason: String::new(),
            transitions: Vec::new(),
        })
    }

    /// Whether `viewer` may see this credit. Admins see all; others only verified.
    pub fn visible_to(&self, viewer: &Viewer) -> bool {
        viewer.is_privileged() || self.verification_status == VerificationStatus::Verified
    }

    /// Whether `viewer` may transfer or retire this credit.
    ///
    /// Only admins and the current holder may. The holder is the issuer
    /// until a transfer, and the recipient from then on.
    pub fn manageable_by(&self, viewer: &Viewer) -> bool {
        viewer.is_privileged() || viewer.wallet == self.recipient
    }

    /// Transfer the whole credit to `recipient` (ISSUED → TRANSFERRED).
    pub fn transfer(
        &mut self,
        recipient: WalletAddress,
        amount: Decimal,
        actor: Uuid,
    ) -> Result<(), CreditError> {
        self.require_status(CreditStatus::Issued, CreditStatus::Transferred)?;
        if amount.normalize() != self.amount.normalize() {
            return Err(CreditError::AmountMismatch {
                requested: amount,
                held: self.amount,
            });
        }
        let reason = format!("transferred to {recipient}");
        self.recipient = recipient;
        self.transferred_at = Some(Utc::now());
        self.do_transition(CreditStatus::Transferred, actor, reason);
        Ok(())
    }

    /// Retire the credit (ISSUED or TRANSFERRED → RETIRED).
    pub fn retire(&mut self, reason: String, actor: Uuid) -> Result<(), CreditError> {
        if self.status.is_terminal() {
            return Err(CreditError::TerminalState { state: self.status });
        }
        self.reason = reason.clone();
        self.retired_at = Some(Utc::now());
        self.do_transition(CreditStatus::Retired, actor, reason);
        Ok(())
    }

    /// Record a verification decision (PENDING → VERIFIED | REJECTED).
    pub fn decide(
        &mut self,
        decision: VerificationStatus,
        actor: Uuid,
        reason: String,
    ) -> Result<(), CreditError> {
        if decision == VerificationStatus::Pending {
            return Err(CreditError::InvalidDecision);
        }
        if self.verification_status != VerificationStatus::Pending {
            return Err(CreditError::AlreadyDecided {
                status: self.verification_status,
            });
        }
        let now = Utc::now();
        self.transitions.push(CreditTransitionRecord {
            transition: CreditTransition::Verification {
                from: self.verification_status,
                to: decision,
            },
            actor,
            timestamp: now,
            reason,
        });
        self.verification_status = decision;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn require_status(&self, expected: CreditStatus, target: CreditStatus) -> Result<(), CreditError> {
        if self.status.is_terminal() {
            return Err(CreditError::TerminalState { state: self.status });
        }
        if self.status != expected {
            return Err(CreditError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        Ok(())
    }

    fn do_transition(&mut self, to: CreditStatus, actor: Uuid, reason: String) {
        let now = Utc::now();
        self.transitions.push(CreditTransitionRecord {
            transition: CreditTransition::Status {
                from: self.status,
                to,
            },
            actor,
            timestamp: now,
            reason,
        });
        self.status = to;
        self.updated_at = now;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
