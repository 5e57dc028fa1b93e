use kube::CustomResourceExt;

use integration_operator::resources::cloudeventssources::CloudEventsSource;
use integration_operator::resources::googlecloudfirestoretargets::GoogleCloudFirestoreTarget;
use integration_operator::resources::sendgridtargets::SendGridTarget;
use integration_operator::resources::solacesources::SolaceSource;

/// Prints the CRDs of every component kind as a multi-document YAML stream.
fn main() -> anyhow::Result<()> {
    let crds = [
        CloudEventsSource::crd(),
        SolaceSource::crd(),
        GoogleCloudFirestoreTarget::crd(),
        SendGridTarget::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
