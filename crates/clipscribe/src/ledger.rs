//! Client-side credit ledger with hold / commit / refund semantics.
//!
//! A [`CreditLedger`] tracks two pools: a free-use counter and a paid credit
//! balance. Submitting a job first places a *hold* that reserves the tier's
//! cost without spending it. The hold is later either committed (the job
//! succeeded) or refunded (it failed or was cancelled).
//!
//! All mutations go through one mutex, so concurrent orchestrators sharing a
//! ledger never interleave a hold with another hold's commit or refund.
//! Authoritative accounting lives server-side; this ledger is advisory and
//! drives what the presentation layer shows.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Processing tier requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// Plain transcript. Eligible for free uses.
    QuickScan,
    /// Transcript plus AI analysis. Always paid.
    AiAnalysis,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::QuickScan => write!(f, "QUICK_SCAN"),
            Tier::AiAnalysis => write!(f, "AI_ANALYSIS"),
        }
    }
}

/// Credit cost per tier.
#[derive(Debug, Clone)]
pub struct TierPricing {
    /// Credits charged for [`Tier::QuickScan`] when no free use remains. Default: 1.
    pub quick_scan: u32,
    /// Credits charged for [`Tier::AiAnalysis`]. Default: 2.
    pub ai_analysis: u32,
}

impl Default for TierPricing {
    fn default() -> Self {
        Self {
            quick_scan: 1,
            ai_analysis: 2,
        }
    }
}

impl TierPricing {
    pub fn cost(&self, tier: Tier) -> u32 {
        match tier {
            Tier::QuickScan => self.quick_scan,
            Tier::AiAnalysis => self.ai_analysis,
        }
    }

    /// Whether the tier may draw on the free-use counter.
    pub fn free_eligible(&self, tier: Tier) -> bool {
        matches!(tier, Tier::QuickScan)
    }
}

/// Pool a hold was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingSource {
    FreeUse,
    Credits,
}

/// Identifies one open hold. Resolving it twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldToken {
    pub id: u64,
    pub tier: Tier,
    pub source: FundingSource,
    pub amount: u32,
}

/// Point-in-time view of the account.
///
/// `free_uses_remaining` and `credit_balance` include amounts still under
/// hold; `held` is the reserved portion of the two combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditAccount {
    pub free_uses_remaining: u32,
    pub credit_balance: u32,
    pub held: u32,
}

impl CreditAccount {
    /// Free uses plus credits, including held amounts.
    pub fn total(&self) -> u32 {
        self.free_uses_remaining + self.credit_balance
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds for {tier}: {required} credit(s) required, {available} available")]
    InsufficientFunds {
        tier: Tier,
        required: u32,
        available: u32,
    },
}

#[derive(Debug, Default)]
struct LedgerState {
    free_uses: u32,
    credits: u32,
    held_free: u32,
    held_credits: u32,
    open: HashMap<u64, HoldToken>,
}

impl LedgerState {
    fn available_free(&self) -> u32 {
        self.free_uses - self.held_free
    }

    fn available_credits(&self) -> u32 {
        self.credits - self.held_credits
    }

    fn release(&mut self, token: &HoldToken) {
        match token.source {
            FundingSource::FreeUse => self.held_free -= token.amount,
            FundingSource::Credits => self.held_credits -= token.amount,
        }
    }
}

/// Free-use and credit ledger shared by orchestrators.
#[derive(Debug)]
pub struct CreditLedger {
    state: Mutex<LedgerState>,
    pricing: TierPricing,
    next_id: AtomicU64,
}

impl CreditLedger {
    /// Create a ledger with default [`TierPricing`].
    pub fn new(free_uses: u32, credits: u32) -> Self {
        Self::with_pricing(free_uses, credits, TierPricing::default())
    }

    pub fn with_pricing(free_uses: u32, credits: u32, pricing: TierPricing) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                free_uses,
                credits,
                ..Default::default()
            }),
            pricing,
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pricing(&self) -> &TierPricing {
        &self.pricing
    }

    /// Current balances.
    pub fn account(&self) -> CreditAccount {
        let s = self.lock();
        CreditAccount {
            free_uses_remaining: s.free_uses,
            credit_balance: s.credits,
            held: s.held_free + s.held_credits,
        }
    }

    /// Whether a hold for `tier` would currently succeed.
    pub fn can_afford(&self, tier: Tier) -> bool {
        let s = self.lock();
        (self.pricing.free_eligible(tier) && s.available_free() > 0)
            || s.available_credits() >= self.pricing.cost(tier)
    }

    /// Reserve the cost of `tier`, drawing on free uses first when eligible.
    pub fn hold(&self, tier: Tier) -> Result<HoldToken, LedgerError> {
        let mut s = self.lock();
        let cost = self.pricing.cost(tier);

        let (source, amount) = if self.pricing.free_eligible(tier) && s.available_free() > 0 {
            (FundingSource::FreeUse, 1)
        } else if s.available_credits() >= cost {
            (FundingSource::Credits, cost)
        } else {
            let available = s.available_credits();
            debug!(%tier, required = cost, available, "Hold rejected");
            return Err(LedgerError::InsufficientFunds {
                tier,
                required: cost,
                available,
            });
        };

        match source {
            FundingSource::FreeUse => s.held_free += amount,
            FundingSource::Credits => s.held_credits += amount,
        }
        let token = HoldToken {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            tier,
            source,
            amount,
        };
        s.open.insert(token.id, token.clone());
        debug!(hold_id = token.id, %tier, ?source, amount, "Hold placed");
        Ok(token)
    }

    /// Permanently consume a hold. Returns `false` if it was already resolved.
    pub fn commit(&self, token: &HoldToken) -> bool {
        let mut s = self.lock();
        let Some(open) = s.open.remove(&token.id) else {
            debug!(hold_id = token.id, "Commit ignored: hold already resolved");
            return false;
        };
        s.release(&open);
        match open.source {
            FundingSource::FreeUse => s.free_uses -= open.amount,
            FundingSource::Credits => s.credits -= open.amount,
        }
        debug!(hold_id = open.id, amount = open.amount, "Hold committed");
        true
    }

    /// Reverse a hold, restoring the pool it was drawn from. Returns `false`
    /// if it was already resolved.
    pub fn refund(&self, token: &HoldToken) -> bool {
        let mut s = self.lock();
        let Some(open) = s.open.remove(&token.id) else {
            warn!(hold_id = token.id, "Refund ignored: hold already resolved");
            return false;
        };
        s.release(&open);
        debug!(hold_id = open.id, amount = open.amount, "Hold refunded");
        true
    }

    /// Number of holds not yet committed or refunded.
    pub fn open_holds(&self) -> usize {
        self.lock().open.len()
    }
}
