//! HLV Core — swap record, status state machine, hashing and amount
//! semantics shared by every layer of the swap orchestrator.

pub mod amount;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod state_machine;
pub mod step;
pub mod swap;
pub mod types;

pub use amount::{sats_to_wei, wei_to_sats, WEI_PER_SAT};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RebalancePolicy, SwapPolicy};
pub use error::CoreError;
pub use event::WatchEvent;
pub use state_machine::{SwapEvent, SwapStateMachine, SwapStatus};
pub use step::{StepOutput, StepRecord, StepState, SwapStep};
pub use swap::{AttachedInvoice, NewSwap, Swap};
pub use types::{PaymentHash, Preimage, SwapDirection, SwapId};
