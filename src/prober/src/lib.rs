pub mod error;
pub mod manager;
pub mod option;
pub mod probe;
pub mod worker;
