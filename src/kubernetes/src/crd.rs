pub mod condition;
pub mod ip_pool;
pub mod load_balancer;
pub mod virtual_machine_instance;

pub const GROUP: &str = "loadbalancer.harvesterhci.io";
pub const VALUE_TRUE: &str = "true";
pub const VALUE_FALSE: &str = "false";
