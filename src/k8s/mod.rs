// Kubernetes access: kubeconfig resolution and a kubectl wrapper.

mod kubeconfig;
mod kubectl;

pub use kubeconfig::{current_context, kubeconfig_path, KubeconfigError};
pub use kubectl::{all_lines_contain, Kubectl};
