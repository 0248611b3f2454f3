pub mod constants;
pub mod util;
