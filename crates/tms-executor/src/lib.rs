//! Order execution for the TMS bot.
//!
//! - `Signals`: stop/refresh flags and interruptible sleeps
//! - `BoundaryScheduler`: coarse wait, preparation, fine wait, fire
//! - `dispatch`: paced attempt loop with success detection
//! - `PriceEngine`: pre-open and continuous pricing under the daily circuit state
//! - `SessionRecovery`: keeps the browser authenticated on the order page
//! - `OrderPage`: form preparation, price fill, market reads
//! - `OrderTrader`: the placement workflow and its audit rows

pub mod dispatch;
pub mod error;
pub mod order_page;
pub mod pricing;
pub mod recovery;
pub mod scheduler;
pub mod signals;
pub mod trader;

pub use dispatch::{dispatch, DispatchConfig, DispatchReport, DispatchTarget, PacingSchedule};
pub use error::{
    OrderError, OrderResult, PricingError, PricingResult, RecoveryError, RecoveryResult,
};
pub use order_page::{OrderLocators, OrderPage};
pub use pricing::{MarketReader, PriceConfig, PriceDecision, PriceEngine};
pub use recovery::{RecoveryConfig, SessionMarkers, SessionRecovery, SessionState};
pub use scheduler::{BoundaryOutcome, BoundaryScheduler, BoundaryTask, SchedulerConfig};
pub use signals::{Interrupt, Signals, StopReason, WaitScope, MAX_SLEEP_STEP};
pub use trader::{OrderTrader, PreparedOrder, TraderParts};
