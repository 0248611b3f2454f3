pub mod ip_pool;
pub mod load_balancer;
pub mod vmi_watcher;
