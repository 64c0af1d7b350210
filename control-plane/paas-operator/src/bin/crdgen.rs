use kube::core::CustomResourceExt;
use paas_operator::crd::Paas;

fn main() {
    let crd = Paas::crd();
    let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
    println!("{}", yaml);
}
