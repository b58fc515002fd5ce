//! Inbound operations: create, cancel, rebalance, and read-only queries.
//!
//! Requests are validated synchronously and rejected before any side effect.
//! Everything asynchronous is handed to the scheduler; its progress is only
//! observable through the query surface.

use chrono::{DateTime, Utc};
use hlv_core::{
    sats_to_wei, wei_to_sats, AttachedInvoice, NewSwap, PaymentHash, Swap, SwapDirection, SwapId,
    SwapStatus, SwapStep,
};
use hlv_ledger::{SwapFilter, TransitionRecord};
use hlv_providers::InvoiceRequest;
use hlv_scheduler::{JobKey, JobPayload, SchedulerError, SwapCommand};
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::context::SwapContext;
use crate::engine::SwapEngine;
use crate::error::EngineError;

/// Default page size of [`SwapService::list_swaps`].
pub const DEFAULT_LIST_LIMIT: usize = 100;

const CANCEL_OWNER: &str = "service";

/// The other side of a swap, as supplied by the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Counterparty {
    /// Invoice to be paid by the agent; binds the payment hash up front.
    Invoice(String),
    /// Chain address that receives the HTLC.
    Address(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSwapRequest {
    pub direction: SwapDirection,
    pub counterparty: Counterparty,
    /// Payment-leg amount in satoshis.
    pub amount: i128,
    pub user_address: String,
    /// Absolute HTLC expiry; defaults to now plus the policy timelock.
    #[serde(default)]
    pub timelock: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceRequest {
    pub user_address: String,
    /// Source balance in chain base units.
    pub source_balance: i128,
    /// Credential of the user's payment-network wallet. Used once to issue
    /// the invoice and never stored.
    pub credential: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub swap_id: SwapId,
    pub status: SwapStatus,
}

impl From<&Swap> for SwapReceipt {
    fn from(swap: &Swap) -> Self {
        Self {
            swap_id: swap.swap_id,
            status: swap.status,
        }
    }
}

/// A swap as shown outside the node. The preimage is withheld; only
/// whether it is known is reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapView {
    pub swap_id: SwapId,
    pub direction: SwapDirection,
    pub status: SwapStatus,
    pub payment_hash: Option<PaymentHash>,
    pub preimage_known: bool,
    pub htlc_amount: u128,
    pub htlc_address: String,
    pub htlc_recipient: String,
    pub htlc_contract_ref: Option<String>,
    pub htlc_tx_hash: Option<String>,
    pub htlc_confirmations: u32,
    pub claim_tx_hash: Option<String>,
    pub claim_confirmations: u32,
    pub refund_tx_hash: Option<String>,
    pub timelock: DateTime<Utc>,
    pub payment_invoice: Option<String>,
    pub invoice_expires_at: Option<DateTime<Utc>>,
    pub payment_amount: u64,
    pub payment_tx_id: Option<String>,
    pub user_address: String,
    pub agent_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub version: u64,
}

impl From<&Swap> for SwapView {
    fn from(swap: &Swap) -> Self {
        Self {
            swap_id: swap.swap_id,
            direction: swap.direction,
            status: swap.status,
            payment_hash: swap.payment_hash,
            preimage_known: swap.preimage.is_some(),
            htlc_amount: swap.htlc_amount,
            htlc_address: swap.htlc_address.clone(),
            htlc_recipient: swap.htlc_recipient.clone(),
            htlc_contract_ref: swap.htlc_contract_ref.clone(),
            htlc_tx_hash: swap.htlc_tx_hash.clone(),
            htlc_confirmations: swap.htlc_confirmations,
            claim_tx_hash: swap.claim_tx_hash.clone(),
            claim_confirmations: swap.claim_confirmations,
            refund_tx_hash: swap.refund_tx_hash.clone(),
            timelock: swap.timelock,
            payment_invoice: swap.payment_invoice.clone(),
            invoice_expires_at: swap.invoice_expires_at,
            payment_amount: swap.payment_amount,
            payment_tx_id: swap.payment_tx_id.clone(),
            user_address: swap.user_address.clone(),
            agent_address: swap.agent_address.clone(),
            created_at: swap.created_at,
            updated_at: swap.updated_at,
            completed_at: swap.completed_at,
            last_error: swap.last_error.clone(),
            version: swap.version,
        }
    }
}

#[derive(Clone)]
pub struct SwapService {
    engine: SwapEngine,
    agent: AgentConfig,
}

impl SwapService {
    pub fn new(engine: SwapEngine, agent: AgentConfig) -> Self {
        Self { engine, agent }
    }

    fn ctx(&self) -> &SwapContext {
        self.engine.context()
    }

    /// Validate and record a new swap, then queue its first step.
    pub async fn create_swap(&self, request: CreateSwapRequest) -> Result<SwapReceipt, EngineError> {
        let ctx = self.ctx();
        let now = ctx.now();

        if request.user_address.trim().is_empty() {
            return Err(EngineError::Validation("user_address is required".into()));
        }
        let htlc_amount = sats_to_wei(request.amount)?;
        let payment_amount = u64::try_from(request.amount)
            .map_err(|_| EngineError::Validation(format!("amount {} out of range", request.amount)))?;

        let timelock = request.timelock.unwrap_or(now + ctx.policy.default_timelock());
        if timelock < now + ctx.policy.safety_margin() {
            return Err(EngineError::Validation(format!(
                "timelock {} must be at least {}s in the future",
                timelock, ctx.policy.safety_margin_secs
            )));
        }

        let (invoice, htlc_recipient) = match request.counterparty {
            Counterparty::Invoice(invoice) => {
                if request.direction == SwapDirection::PaymentToChain {
                    return Err(EngineError::Validation(
                        "payment-to-chain swaps take a chain address, not an invoice".into(),
                    ));
                }
                let attached = self.attach_invoice(&invoice, payment_amount, now).await?;
                (Some(attached), self.agent.agent_address.clone())
            }
            Counterparty::Address(address) => {
                if address.trim().is_empty() {
                    return Err(EngineError::Validation("counterparty address is empty".into()));
                }
                (None, address)
            }
        };

        let first_step = if invoice.is_some() {
            SwapStep::LockHtlc
        } else {
            SwapStep::CreateInvoice
        };
        let swap = Swap::new(
            NewSwap {
                direction: request.direction,
                htlc_amount,
                payment_amount,
                htlc_address: self.agent.htlc_contract_address.clone(),
                htlc_recipient,
                timelock,
                user_address: request.user_address,
                agent_address: self.agent.agent_address.clone(),
                invoice,
            },
            now,
        );
        let swap = ctx.ledger.insert(swap).await?;
        ctx.enqueue_step(swap.swap_id, first_step)?;

        tracing::info!(
            swap_id = %swap.swap_id,
            direction = %swap.direction,
            amount_sats = swap.payment_amount,
            "swap created"
        );
        Ok(SwapReceipt::from(&swap))
    }

    /// Decode a counterparty invoice and check it can back a new swap.
    async fn attach_invoice(
        &self,
        invoice: &str,
        amount_sats: u64,
        now: DateTime<Utc>,
    ) -> Result<AttachedInvoice, EngineError> {
        let ctx = self.ctx();
        let decoded = ctx
            .capabilities
            .payment
            .decode_invoice(invoice)
            .await
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        if decoded.amount_sats != amount_sats {
            return Err(EngineError::Validation(format!(
                "invoice amount {} sats does not match swap amount {} sats",
                decoded.amount_sats, amount_sats
            )));
        }
        if decoded.expires_at <= now {
            return Err(EngineError::Validation("invoice has expired".into()));
        }
        if let Some(existing) = ctx
            .ledger
            .find_active_by_payment_hash(&decoded.payment_hash)
            .await?
        {
            return Err(EngineError::Validation(format!(
                "payment hash {} is already bound to swap {}",
                decoded.payment_hash, existing.swap_id
            )));
        }
        Ok(AttachedInvoice {
            invoice: invoice.to_string(),
            payment_hash: decoded.payment_hash,
            expires_at: decoded.expires_at,
        })
    }

    /// Cancel a pending swap.
    ///
    /// Serialized with the swap's steps: if one is in progress the
    /// cancellation stays queued behind it and this call reports so.
    pub async fn cancel_swap(&self, swap_id: SwapId) -> Result<Swap, EngineError> {
        let ctx = self.ctx();
        let swap = ctx
            .ledger
            .get(swap_id)
            .await?
            .ok_or(EngineError::NotFound(swap_id))?;
        if swap.status != SwapStatus::Pending {
            return Err(EngineError::Precondition(format!(
                "swap {} is {}; only pending swaps can be cancelled",
                swap_id, swap.status
            )));
        }

        let payload = JobPayload::Command {
            swap_id,
            command: SwapCommand::Cancel,
        };
        let key = JobKey::for_payload(&payload);
        ctx.scheduler.enqueue(payload)?;

        let lease = match ctx.scheduler.claim(&key, CANCEL_OWNER) {
            Ok(lease) => lease,
            Err(SchedulerError::NotAvailable(_)) | Err(SchedulerError::AtCapacity(_)) => {
                ctx.notify.notify_one();
                return Err(EngineError::Precondition(
                    "step in progress; cancellation queued".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let result = self.engine.cancel(swap_id).await;
        ctx.scheduler.complete(&lease)?;
        result
    }

    /// Move part of a user's chain balance to the payment network.
    ///
    /// The invoice is issued immediately with the user's credential, so the
    /// credential never reaches the ledger or the job journal.
    pub async fn rebalance(&self, request: RebalanceRequest) -> Result<SwapReceipt, EngineError> {
        let ctx = self.ctx();
        let now = ctx.now();

        if request.user_address.trim().is_empty() {
            return Err(EngineError::Validation("user_address is required".into()));
        }
        if request.credential.trim().is_empty() {
            return Err(EngineError::Validation("payment-network credential is required".into()));
        }

        let balance_sats = wei_to_sats(request.source_balance)?;
        let amount_sats = ctx.policy.rebalance.amount_for(balance_sats)?;
        let htlc_amount = sats_to_wei(amount_sats as i128)?;

        let invoice_request = InvoiceRequest {
            amount_sats,
            description: format!("HLV rebalance for {}", request.user_address),
            expiry_secs: ctx.policy.invoice_expiry_secs,
            credential: Some(request.credential),
        };
        let payment = &ctx.capabilities.payment;
        payment.precheck_create_invoice(&invoice_request).await?;
        let issued = payment.create_invoice(invoice_request).await?;

        let swap = Swap::new(
            NewSwap {
                direction: SwapDirection::ChainToPayment,
                htlc_amount,
                payment_amount: amount_sats,
                htlc_address: self.agent.htlc_contract_address.clone(),
                htlc_recipient: self.agent.agent_address.clone(),
                timelock: now + ctx.policy.default_timelock(),
                user_address: request.user_address,
                agent_address: self.agent.agent_address.clone(),
                invoice: Some(AttachedInvoice {
                    invoice: issued.invoice,
                    payment_hash: issued.payment_hash,
                    expires_at: issued.expires_at,
                }),
            },
            now,
        );
        let swap = ctx.ledger.insert(swap).await?;
        ctx.enqueue_step(swap.swap_id, SwapStep::LockHtlc)?;

        tracing::info!(
            swap_id = %swap.swap_id,
            balance_sats,
            amount_sats,
            "rebalance swap created"
        );
        Ok(SwapReceipt::from(&swap))
    }

    pub async fn get_swap(&self, swap_id: SwapId) -> Result<Swap, EngineError> {
        self.ctx()
            .ledger
            .get(swap_id)
            .await?
            .ok_or(EngineError::NotFound(swap_id))
    }

    /// Swaps matching `filter`, newest first, at most [`DEFAULT_LIST_LIMIT`]
    /// unless the filter sets a limit.
    pub async fn list_swaps(&self, mut filter: SwapFilter) -> Result<Vec<Swap>, EngineError> {
        filter.limit.get_or_insert(DEFAULT_LIST_LIMIT);
        Ok(self.ctx().ledger.list(&filter).await?)
    }

    /// Audit log of a swap's status changes, oldest first.
    pub async fn transitions(&self, swap_id: SwapId) -> Result<Vec<TransitionRecord>, EngineError> {
        self.get_swap(swap_id).await?;
        Ok(self.ctx().ledger.transitions(swap_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::testutil::Harness;
    use chrono::Duration;
    use hlv_providers::InternalPaymentNetwork;

    fn request(counterparty: Counterparty, amount: i128) -> CreateSwapRequest {
        CreateSwapRequest {
            direction: SwapDirection::ChainToPayment,
            counterparty,
            amount,
            user_address: "0xuser".into(),
            timelock: None,
        }
    }

    #[tokio::test]
    async fn test_create_with_invoice_binds_hash_and_queues_lock() {
        let h = Harness::new();
        let invoice = h.issue_invoice(10_000).await;

        let receipt = h
            .service
            .create_swap(request(Counterparty::Invoice(invoice.clone()), 10_000))
            .await
            .unwrap();
        assert_eq!(receipt.status, SwapStatus::Pending);

        let swap = h.swap(receipt.swap_id).await;
        assert_eq!(swap.payment_invoice.as_deref(), Some(invoice.as_str()));
        assert_eq!(swap.htlc_amount, 100_000_000_000_000);
        assert_eq!(swap.payment_amount, 10_000);
        assert_eq!(swap.timelock, h.now() + Duration::hours(24));
        assert!(h.has_live_step(swap.swap_id, SwapStep::LockHtlc));
    }

    #[tokio::test]
    async fn test_create_with_address_queues_invoice() {
        let h = Harness::new();
        let receipt = h
            .service
            .create_swap(CreateSwapRequest {
                direction: SwapDirection::PaymentToChain,
                counterparty: Counterparty::Address("0xcounterparty".into()),
                amount: 5_000,
                user_address: "0xuser".into(),
                timelock: None,
            })
            .await
            .unwrap();

        let swap = h.swap(receipt.swap_id).await;
        assert_eq!(swap.htlc_recipient, "0xcounterparty");
        assert!(swap.payment_hash.is_none());
        assert!(h.has_live_step(swap.swap_id, SwapStep::CreateInvoice));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_amounts() {
        let h = Harness::new();
        for amount in [0, -10_000] {
            let err = h
                .service
                .create_swap(request(Counterparty::Address("0xa".into()), amount))
                .await
                .unwrap_err();
            assert_eq!(err.class(), ErrorClass::Validation);
        }
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_mismatched_invoice() {
        let h = Harness::new();
        let invoice = h.issue_invoice(9_000).await;
        let err = h
            .service
            .create_swap(request(Counterparty::Invoice(invoice), 10_000))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[tokio::test]
    async fn test_create_rejects_garbage_invoice() {
        let h = Harness::new();
        let err = h
            .service
            .create_swap(request(Counterparty::Invoice("lnbc-nonsense".into()), 10_000))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[tokio::test]
    async fn test_create_rejects_reused_payment_hash() {
        let h = Harness::new();
        let invoice = h.issue_invoice(10_000).await;
        h.service
            .create_swap(request(Counterparty::Invoice(invoice.clone()), 10_000))
            .await
            .unwrap();
        let err = h
            .service
            .create_swap(request(Counterparty::Invoice(invoice), 10_000))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already bound"));
    }

    #[tokio::test]
    async fn test_create_rejects_invoice_for_payment_to_chain() {
        let h = Harness::new();
        let invoice = h.issue_invoice(10_000).await;
        let mut req = request(Counterparty::Invoice(invoice), 10_000);
        req.direction = SwapDirection::PaymentToChain;
        let err = h.service.create_swap(req).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[tokio::test]
    async fn test_create_rejects_short_timelock() {
        let h = Harness::new();
        let mut req = request(Counterparty::Address("0xa".into()), 10_000);
        req.timelock = Some(h.now() + Duration::minutes(10));
        let err = h.service.create_swap(req).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[tokio::test]
    async fn test_cancel_pending_swap() {
        let h = Harness::new();
        let receipt = h
            .service
            .create_swap(request(Counterparty::Address("0xa".into()), 10_000))
            .await
            .unwrap();

        let swap = h.service.cancel_swap(receipt.swap_id).await.unwrap();
        assert_eq!(swap.status, SwapStatus::Cancelled);
        let key = JobKey::command(receipt.swap_id, SwapCommand::Cancel);
        assert!(h.scheduler.live_job(&key).is_none());

        let err = h.service.cancel_swap(receipt.swap_id).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Precondition);
    }

    #[tokio::test]
    async fn test_cancel_queued_behind_running_step() {
        let h = Harness::new();
        let receipt = h
            .service
            .create_swap(request(Counterparty::Address("0xa".into()), 10_000))
            .await
            .unwrap();
        let lease = h
            .scheduler
            .claim(&JobKey::step(receipt.swap_id, SwapStep::CreateInvoice), "worker-1")
            .unwrap();

        let err = h.service.cancel_swap(receipt.swap_id).await.unwrap_err();
        assert!(err.to_string().contains("cancellation queued"));
        assert_eq!(h.swap(receipt.swap_id).await.status, SwapStatus::Pending);

        h.scheduler.complete(&lease).unwrap();
        let key = JobKey::command(receipt.swap_id, SwapCommand::Cancel);
        assert!(h.scheduler.live_job(&key).is_some());
    }

    #[tokio::test]
    async fn test_rebalance_sizes_and_issues_invoice() {
        let h = Harness::new();
        // 100_000 sats
        let receipt = h
            .service
            .rebalance(RebalanceRequest {
                user_address: "0xuser".into(),
                source_balance: 1_000_000_000_000_000,
                credential: "nostr+walletconnect://secret".into(),
            })
            .await
            .unwrap();

        let swap = h.swap(receipt.swap_id).await;
        assert_eq!(swap.direction, SwapDirection::ChainToPayment);
        assert_eq!(swap.payment_amount, 20_000);
        assert_eq!(swap.htlc_amount, 200_000_000_000_000);
        assert_eq!(h.payment.create_calls(), 1);
        let decoded = InternalPaymentNetwork::encode_invoice(
            20_000,
            &swap.payment_hash.unwrap(),
            swap.invoice_expires_at.unwrap(),
        );
        assert_eq!(swap.payment_invoice.as_deref(), Some(decoded.as_str()));
        assert!(h.has_live_step(swap.swap_id, SwapStep::LockHtlc));

        let journaled = serde_json::to_string(&swap).unwrap();
        assert!(!journaled.contains("secret"));
    }

    #[tokio::test]
    async fn test_rebalance_rejects_dust_balance() {
        let h = Harness::new();
        let err = h
            .service
            .rebalance(RebalanceRequest {
                user_address: "0xuser".into(),
                source_balance: 50_000_000_000,
                credential: "cred".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
        assert_eq!(h.payment.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_list_and_get() {
        let h = Harness::new();
        for user in ["0xa", "0xa", "0xb"] {
            let mut req = request(Counterparty::Address("0xc".into()), 1_000);
            req.user_address = user.into();
            h.service.create_swap(req).await.unwrap();
        }

        let all = h.service.list_swaps(SwapFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        let mine = h
            .service
            .list_swaps(SwapFilter {
                user_address: Some("0xa".into()),
                ..SwapFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);

        let missing = h.service.get_swap(SwapId::new()).await.unwrap_err();
        assert!(matches!(missing, EngineError::NotFound(_)));

        let history = h.service.transitions(all[0].swap_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to, SwapStatus::Pending);
    }

    #[tokio::test]
    async fn test_view_withholds_preimage() {
        let h = Harness::new();
        let swap = h.locked_and_confirmed(10_000).await;
        h.engine.run_step(swap.swap_id, SwapStep::PayInvoice).await.unwrap();
        let settled = h.service.get_swap(swap.swap_id).await.unwrap();
        let preimage = settled.preimage.clone().unwrap();

        let view = SwapView::from(&settled);
        assert!(view.preimage_known);
        assert_eq!(view.payment_hash, settled.payment_hash);

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("preimage").is_none());
        assert!(!json.to_string().contains(&preimage.to_hex()));
    }
}
