//! CRD YAML Generator
//!
//! This binary generates the Kubernetes CRD manifest for the SopsSecret
//! resource defined by the operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use sops_secret_operator::crd::generate_crds;

fn main() {
    for crd in generate_crds() {
        println!("---");
        print!("{}", crd);
    }
}
