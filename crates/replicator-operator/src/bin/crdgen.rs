use kube::core::CustomResourceExt;
use replicator_operator::crds::replicator::Replicator;

fn main() {
    println!(
        "{}",
        serde_yaml::to_string(&Replicator::crd()).expect("serialize crd")
    );
}
