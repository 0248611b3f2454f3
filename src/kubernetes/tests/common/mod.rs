use std::io::Write;
use std::process::Stdio;

use kube::{core::ObjectMeta, CustomResourceExt};
use vlbd_kubernetes::crd::{
    ip_pool::{IPPool, IPPoolSpec, Range, Selector, Tuple, IP_POOL_FINALIZER},
    load_balancer::{LoadBalancer, LoadBalancerSpec, WorkloadType},
};

// Make sure kind binary is in here
const KIND_BIN: &str = "../../bin/kind";
const KUBECTL_BIN: &str = "../../bin/kubectl";
const KIND_CLUSTER_NAME: &str = "vlbd-integration";
const KIND_CLUSTER_IMAGE: &str = "kindest/node";
const KIND_CLUSTER_IMAGE_VERSION_ENV: &str = "KIND_NODE_VERSION";

pub fn setup_kind() {
    cleanup_kind_no_output();
    let mut binding = std::process::Command::new(KIND_BIN);
    binding.args(["create", "cluster", "--name", KIND_CLUSTER_NAME]);
    if let Ok(v) = std::env::var(KIND_CLUSTER_IMAGE_VERSION_ENV) {
        binding.args(["--image", &format!("{}:{}", KIND_CLUSTER_IMAGE, v)]);
    };

    let out = binding.output().expect("failed to create kind cluster");
    output_result(out);

    install_crd();

    std::thread::sleep(std::time::Duration::from_secs(2));
}

pub fn cleanup_kind() {
    let out = std::process::Command::new(KIND_BIN)
        .args(["delete", "cluster", "--name", KIND_CLUSTER_NAME])
        .output()
        .expect("failed to delete kind cluster");
    output_result(out);

    std::thread::sleep(std::time::Duration::from_secs(5));
}

pub fn cleanup_kind_no_output() {
    let _ = std::process::Command::new(KIND_BIN)
        .args(["delete", "cluster", "--name", KIND_CLUSTER_NAME])
        .output();
}

fn install_crd() {
    let manifest = [
        serde_yaml::to_string(&IPPool::crd()).expect("failed to render IPPool CRD"),
        serde_yaml::to_string(&LoadBalancer::crd()).expect("failed to render LoadBalancer CRD"),
    ]
    .join("---\n");

    let mut child = std::process::Command::new(KUBECTL_BIN)
        .args(["apply", "-f", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run kubectl");
    child
        .stdin
        .take()
        .expect("failed to open stdin")
        .write_all(manifest.as_bytes())
        .expect("failed to write crd manifest");
    let out = child.wait_with_output().expect("failed to install crd");
    output_result(out);
}

fn output_result(out: std::process::Output) {
    if out.status.success() {
        println!("STDOUT");
        println!("{}", String::from_utf8_lossy(&out.stdout));
    } else {
        println!("STDERR: exit status is {}", out.status);
        println!("{}", String::from_utf8_lossy(&out.stderr));
    }
}

pub fn test_ip_pool() -> IPPool {
    IPPool {
        metadata: ObjectMeta {
            name: Some("test-pool".to_string()),
            finalizers: Some(vec![IP_POOL_FINALIZER.to_string()]),
            ..Default::default()
        },
        spec: IPPoolSpec {
            description: Some("integration test pool".to_string()),
            ranges: vec![Range {
                subnet: "192.168.100.0/24".to_string(),
                range_start: Some("192.168.100.10".to_string()),
                range_end: Some("192.168.100.19".to_string()),
                gateway: Some("192.168.100.1".to_string()),
            }],
            selector: Selector {
                priority: 0,
                network: String::new(),
                scope: vec![Tuple {
                    project: "*".to_string(),
                    namespace: "default".to_string(),
                    guest_cluster: "*".to_string(),
                }],
            },
        },
        status: None,
    }
}

pub fn test_cluster_load_balancer() -> LoadBalancer {
    LoadBalancer {
        metadata: ObjectMeta {
            name: Some("test-lb".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: LoadBalancerSpec {
            workload_type: WorkloadType::Cluster,
            ..Default::default()
        },
        status: None,
    }
}
