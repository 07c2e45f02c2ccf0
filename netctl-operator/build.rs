use kube::CustomResourceExt;
use netctl_types::IPAllocation;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/netinfra.darkbrains.com_netipallocations.yaml",
        serde_yaml::to_string(&IPAllocation::crd()).unwrap(),
    )
    .unwrap();
}
