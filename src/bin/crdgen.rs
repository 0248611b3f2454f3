use kube::CustomResourceExt;
use vlbd_kubernetes::crd;

fn main() {
    print!(
        "{}",
        serde_yaml::to_string(&crd::ip_pool::IPPool::crd()).unwrap()
    );
    println!("---");
    print!(
        "{}",
        serde_yaml::to_string(&crd::load_balancer::LoadBalancer::crd()).unwrap()
    );
}
