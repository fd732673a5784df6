//! Print every CRD as a multi-document YAML stream
//!
//! `cargo run -p crds --bin crdgen > config/crd/crds.yaml`

use crds::{NetworkInfo, Subnet, SubnetConnectionBindingMap, SubnetSet, VPCNetworkConfiguration};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        VPCNetworkConfiguration::crd(),
        SubnetSet::crd(),
        Subnet::crd(),
        SubnetConnectionBindingMap::crd(),
        NetworkInfo::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
