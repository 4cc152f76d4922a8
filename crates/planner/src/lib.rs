//! Budget allocation scoring against a fitted marketing-mix model.

pub mod allocation;
pub mod breakdown;

pub use allocation::AllocationScorer;
pub use breakdown::{even_split, AllocationBreakdown, BudgetStatus, ChannelRoi};
