mod deepcopy;
mod kustomization;
mod types;

pub use deepcopy::*;
pub use kustomization::*;
pub use types::*;
