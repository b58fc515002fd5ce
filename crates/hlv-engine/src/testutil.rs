//! Shared fixture for engine tests: in-memory ledger and journal, internal
//! providers and a manual clock, wired the way the node wires them.

use chrono::{DateTime, Duration, TimeZone, Utc};
use hlv_core::{Clock, ManualClock, NewSwap, Swap, SwapDirection, SwapId, SwapPolicy, SwapStep, WatchEvent};
use hlv_ledger::{ISwapLedger, MemoryLedger};
use hlv_providers::{
    Capabilities, IPaymentProvider, InternalHtlcContract, InternalPaymentNetwork, InvoiceRequest,
};
use hlv_scheduler::{JobKey, MemoryJournal, Scheduler, SchedulerConfig};
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::context::SwapContext;
use crate::engine::SwapEngine;
use crate::service::{CreateSwapRequest, Counterparty, SwapService};

pub(crate) struct Harness {
    pub clock: Arc<ManualClock>,
    pub payment: Arc<InternalPaymentNetwork>,
    pub contract: Arc<InternalHtlcContract>,
    pub ledger: Arc<MemoryLedger>,
    pub scheduler: Arc<Scheduler>,
    pub ctx: SwapContext,
    pub engine: SwapEngine,
    pub service: SwapService,
    pub agent: AgentConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(SwapPolicy::default())
    }

    pub fn with_policy(policy: SwapPolicy) -> Self {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let payment = Arc::new(InternalPaymentNetwork::new(dyn_clock.clone()));
        let contract = Arc::new(InternalHtlcContract::new(dyn_clock.clone()));
        let ledger = Arc::new(MemoryLedger::new());
        let scheduler = Arc::new(
            Scheduler::new(
                SchedulerConfig::default(),
                dyn_clock.clone(),
                Arc::new(MemoryJournal::new()),
            )
            .unwrap(),
        );

        let ctx = SwapContext::new(
            ledger.clone(),
            Capabilities::new(payment.clone(), contract.clone()),
            scheduler.clone(),
            dyn_clock,
            policy,
        );
        let engine = SwapEngine::new(ctx.clone());
        let agent = AgentConfig::default();
        let service = SwapService::new(engine.clone(), agent.clone());

        Self {
            clock,
            payment,
            contract,
            ledger,
            scheduler,
            ctx,
            engine,
            service,
            agent,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn swap(&self, swap_id: SwapId) -> Swap {
        self.ledger.get(swap_id).await.unwrap().unwrap()
    }

    pub fn has_live_step(&self, swap_id: SwapId, step: SwapStep) -> bool {
        self.scheduler.live_job(&JobKey::step(swap_id, step)).is_some()
    }

    /// An invoice issued by the internal payment network, as a counterparty
    /// would hand it over.
    pub async fn issue_invoice(&self, amount_sats: u64) -> String {
        self.payment
            .create_invoice(InvoiceRequest {
                amount_sats,
                description: "counterparty".into(),
                expiry_secs: 86_400,
                credential: None,
            })
            .await
            .unwrap()
            .invoice
    }

    pub async fn create_with_invoice(&self, amount_sats: u64) -> Swap {
        let invoice = self.issue_invoice(amount_sats).await;
        self.create(SwapDirection::ChainToPayment, Counterparty::Invoice(invoice), amount_sats)
            .await
    }

    pub async fn create_for_address(&self, amount_sats: u64) -> Swap {
        self.create(
            SwapDirection::PaymentToChain,
            Counterparty::Address("0xcounterparty".into()),
            amount_sats,
        )
        .await
    }

    async fn create(&self, direction: SwapDirection, counterparty: Counterparty, amount_sats: u64) -> Swap {
        let receipt = self
            .service
            .create_swap(CreateSwapRequest {
                direction,
                counterparty,
                amount: amount_sats as i128,
                user_address: "0xuser".into(),
                timelock: None,
            })
            .await
            .unwrap();
        self.swap(receipt.swap_id).await
    }

    /// A swap whose HTLC is locked at full confirmation depth.
    pub async fn locked_and_confirmed(&self, amount_sats: u64) -> Swap {
        let swap = self.create_with_invoice(amount_sats).await;
        self.engine.run_step(swap.swap_id, SwapStep::LockHtlc).await.unwrap();
        let depth = self.ctx.policy.confirmation_depth;
        self.contract.mine_blocks(depth as u64);
        self.engine
            .handle_event(swap.swap_id, WatchEvent::HtlcConfirmed { confirmations: depth })
            .await
            .unwrap();
        self.swap(swap.swap_id).await
    }

    /// An engine sharing this harness's collaborators with a different step
    /// timeout.
    pub fn engine_with_timeout(&self, step_timeout_ms: u64) -> SwapEngine {
        let mut ctx = self.ctx.clone();
        ctx.policy = Arc::new(SwapPolicy {
            step_timeout_ms,
            ..(*self.ctx.policy).clone()
        });
        SwapEngine::new(ctx)
    }

    /// Complete every due job without running it.
    pub fn drain_jobs(&self) {
        while let Some(lease) = self.scheduler.claim_next("test").unwrap() {
            self.scheduler.complete(&lease).unwrap();
        }
    }

    /// A pending swap that was never inserted.
    pub fn sample_swap(&self) -> Swap {
        let now = self.now();
        Swap::new(
            NewSwap {
                direction: SwapDirection::PaymentToChain,
                htlc_amount: 100_000_000_000_000,
                payment_amount: 10_000,
                htlc_address: self.agent.htlc_contract_address.clone(),
                htlc_recipient: "0xcounterparty".into(),
                timelock: now + Duration::hours(24),
                user_address: "0xuser".into(),
                agent_address: self.agent.agent_address.clone(),
                invoice: None,
            },
            now,
        )
    }
}
