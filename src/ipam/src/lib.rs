pub mod allocator;
pub mod error;
pub mod ledger;
pub mod range;
pub mod registry;
pub mod selector;
pub mod store;
