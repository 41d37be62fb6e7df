//! Venue integrations for the two legs of the hedge.
//!
//! ## Trading interface
//! [`TradingVenue`] is everything the control loop asks of a venue:
//! - Market data (order books)
//! - Order placement, inspection and cancellation
//! - Positions and balances
//!
//! ## Paper trading
//! [`MockVenue`] simulates matching, optionally fed by live public books
//! from [`PublicBookClient`]. [`PaperSpotVenue`] shares the simulated spot
//! holding between processes through the position cache.

mod error;
pub mod mock;
pub mod paper;
pub mod public;
mod traits;
mod types;

pub use error::VenueError;
pub use mock::{FillPlan, MockVenue};
pub use paper::PaperSpotVenue;
pub use public::{BookFormat, PublicBookClient};
pub use traits::{BookFeed, TradingVenue};
pub use types::*;
