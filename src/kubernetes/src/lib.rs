pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod fixture;
pub mod util;
