use kube::CustomResourceExt;

fn main() {
    print!(
        "{}",
        serde_yaml::to_string(&nodepool_operator::resources::nodepools::NodePool::crd()).unwrap()
    )
}
