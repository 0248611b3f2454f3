pub mod ip_pool;
pub mod load_balancer;
