//! Prints the CloudNet CRDs as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > deploy/crds.yaml`

use crds::{CloudIP, NodeNetwork};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [NodeNetwork::crd(), CloudIP::crd()];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
