//! Hedging strategy.
//!
//! Contains the core logic for:
//! - Inventory targets and spot trading permissions
//! - Fill-or-kill taker execution on the derivatives leg
//! - Resting maker orders on the spot leg
//! - The control loop tying signal, execution and positions together

pub mod control;
pub mod inventory;
pub mod maker;
pub mod taker;

pub use control::{ControlLoop, ControlSettings, CycleOutcome, HedgeRole, SkipReason};
pub use inventory::{target_derivative_position, within_band, InventoryBounds};
pub use maker::{
    weighted_limit_price, MakerConfig, MakerOutcome, MakerReport, MakerTracker, TrackedOrder,
};
pub use taker::{FokOutcome, RevertStatus, TakerConfig, TakerExecutor};
