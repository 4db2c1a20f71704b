use anyhow::Result;
use clap::Parser;
use kube::CustomResourceExt as _;

use crate::api::v1alpha1::Kustomization;

#[derive(Parser, Debug, Clone)]
pub enum SubCommand {
    /// Print the Kustomization CustomResourceDefinition as YAML
    Crd,
}

impl SubCommand {
    pub fn run(self) -> Result<()> {
        match self {
            SubCommand::Crd => {
                print!("{}", crd_yaml()?);
            }
        }

        Ok(())
    }
}

pub fn crd_yaml() -> Result<String> {
    Ok(serde_yaml::to_string(&Kustomization::crd())?)
}
