//! A full swap stack over in-memory storage, the internal providers and a
//! manual clock, for the cross-crate tests in `tests/`.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use hlv_core::{Clock, ManualClock, Swap, SwapDirection, SwapId, SwapPolicy};
use hlv_engine::{
    AgentConfig, Counterparty, CreateSwapRequest, SwapContext, SwapEngine, SwapService, WatcherConfig, Worker,
};
use hlv_ledger::{ISwapLedger, MemoryLedger};
use hlv_providers::{Capabilities, IPaymentProvider, InternalHtlcContract, InternalPaymentNetwork, InvoiceRequest};
use hlv_scheduler::{MemoryJournal, Scheduler, SchedulerConfig};

pub struct SwapFixture {
    pub clock: Arc<ManualClock>,
    pub payment: Arc<InternalPaymentNetwork>,
    pub contract: Arc<InternalHtlcContract>,
    pub ledger: Arc<MemoryLedger>,
    pub scheduler: Arc<Scheduler>,
    pub engine: SwapEngine,
    pub service: SwapService,
    pub worker: Worker,
}

impl Default for SwapFixture {
    fn default() -> Self {
        Self::new(SwapPolicy::default())
    }
}

impl SwapFixture {
    pub fn new(policy: SwapPolicy) -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let clock = Arc::new(ManualClock::new(start));
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let payment = Arc::new(InternalPaymentNetwork::new(dyn_clock.clone()));
        let contract = Arc::new(InternalHtlcContract::new(dyn_clock.clone()));
        let ledger = Arc::new(MemoryLedger::new());
        let scheduler = match Scheduler::new(
            SchedulerConfig::default(),
            dyn_clock.clone(),
            Arc::new(MemoryJournal::new()),
        ) {
            Ok(scheduler) => Arc::new(scheduler),
            Err(e) => panic!("default scheduler config rejected: {}", e),
        };

        let ctx = SwapContext::new(
            ledger.clone(),
            Capabilities::new(payment.clone(), contract.clone()),
            scheduler.clone(),
            dyn_clock,
            policy,
        );
        let engine = SwapEngine::new(ctx);
        let service = SwapService::new(engine.clone(), AgentConfig::default());
        let worker = Worker::new(engine.clone(), WatcherConfig::default(), "it-worker");

        Self {
            clock,
            payment,
            contract,
            ledger,
            scheduler,
            engine,
            service,
            worker,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn confirmation_depth(&self) -> u32 {
        self.engine.context().policy.confirmation_depth
    }

    pub async fn swap(&self, swap_id: SwapId) -> Swap {
        match self.ledger.get(swap_id).await {
            Ok(Some(swap)) => swap,
            other => panic!("swap {} not readable: {:?}", swap_id, other),
        }
    }

    /// Run every due job to completion.
    pub async fn run_jobs(&self) -> usize {
        match self.worker.run_until_idle().await {
            Ok(processed) => processed,
            Err(e) => panic!("worker failed: {}", e),
        }
    }

    /// An invoice from the payment network, as a counterparty hands it over.
    pub async fn counterparty_invoice(&self, amount_sats: u64) -> String {
        let request = InvoiceRequest {
            amount_sats,
            description: "counterparty".into(),
            expiry_secs: 86_400,
            credential: None,
        };
        match self.payment.create_invoice(request).await {
            Ok(issued) => issued.invoice,
            Err(e) => panic!("invoice not issued: {}", e),
        }
    }

    pub fn address_request(&self, amount_sats: i128) -> CreateSwapRequest {
        CreateSwapRequest {
            direction: SwapDirection::PaymentToChain,
            counterparty: Counterparty::Address("0xcounterparty".into()),
            amount: amount_sats,
            user_address: "0xuser".into(),
            timelock: None,
        }
    }

    pub fn invoice_request(&self, invoice: String, amount_sats: i128) -> CreateSwapRequest {
        CreateSwapRequest {
            direction: SwapDirection::ChainToPayment,
            counterparty: Counterparty::Invoice(invoice),
            amount: amount_sats,
            user_address: "0xuser".into(),
            timelock: None,
        }
    }
}
