//! Prints the CRD manifests as a multi-document YAML stream.
//!
//! ```sh
//! cargo run -p crds --bin crdgen > deploy/crds.yaml
//! ```

use crds::{FloatingIP, FloatingIPRange};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let docs = [
        serde_yaml::to_string(&FloatingIPRange::crd())?,
        serde_yaml::to_string(&FloatingIP::crd())?,
    ];
    print!("{}", docs.join("---\n"));
    Ok(())
}
