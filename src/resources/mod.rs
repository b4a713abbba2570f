pub mod common;
pub mod deployment;
pub mod exec_pod;
pub mod pvc;
pub mod quantity;
pub mod secret;
pub mod service;
pub mod upserter;

pub use common::{API_VERSION, FIELD_MANAGER, KIND, owner_reference, standard_labels};
pub use deployment::PodTemplateOptions;
pub use secret::{KubeSecretWriter, SecretWriter};
pub use upserter::{KubeResourceUpserter, ResourceUpserter};
