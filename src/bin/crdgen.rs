//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions of every kind the operator owns as a
//! multi-document YAML stream.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/all.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use app_operator::crd::{App, AppCatalogEntry, Catalog, Chart};
use kube::core::CustomResourceExt;

fn main() {
    let crds = [App::crd(), Chart::crd(), Catalog::crd(), AppCatalogEntry::crd()];
    for crd in &crds {
        match serde_yaml::to_string(crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
