//! Prints every CRD as a multi-document YAML stream.

use crds::{Job, PodGroup, Queue};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    for crd in [Job::crd(), Queue::crd(), PodGroup::crd()] {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
