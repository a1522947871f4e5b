//! Lot domain module.
//!
//! Business rules for stock lots, implemented purely as deterministic domain
//! logic (no IO, no storage): the two-bin quantity invariant, draw planning,
//! the return/credit-note state machine and transfer splitting.

pub mod bins;
pub mod lot;
pub mod returns;
pub mod transfer;

pub use bins::{Bin, BinPreference, BinQuantities, DrawPlan, GroupDraw, plan_draw, plan_group_draw};
pub use lot::{Lot, LotDraft, LotFilter, LotId};
pub use returns::{ReturnCase, ReturnState};
pub use transfer::TransferMeta;
