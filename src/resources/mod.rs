pub mod cloudeventssources;
pub mod common;
pub mod googlecloudfirestoretargets;
pub mod knative;
pub mod sendgridtargets;
pub mod solacesources;
