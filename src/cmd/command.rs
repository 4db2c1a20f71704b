use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::{config::ConfigLoadOption, config::Config, workers::kube::KubeWorkerConfig};

use super::SubCommand;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, disable_help_subcommand = true)]
pub struct Command {
    /// Namespace to watch (default: all namespaces)
    #[arg(short, long, display_order = 1000)]
    pub namespace: Option<String>,

    /// Context
    #[arg(short, long, display_order = 1000)]
    pub context: Option<String>,

    /// kubeconfig path (default: in-cluster config or ~/.kube/config)
    #[arg(short = 'C', long, display_order = 1000)]
    pub kubeconfig: Option<PathBuf>,

    /// Force logging even if disabled in the config file
    #[arg(short = 'l', long, display_order = 1000)]
    pub logging: bool,

    /// Log external commands and full error chains
    #[arg(long, display_order = 1000)]
    pub debug: bool,

    /// Config file path
    #[arg(long, display_order = 1000)]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub subcommand: Option<SubCommand>,
}

impl Command {
    pub fn init() -> Self {
        Self::parse()
    }

    /// コマンドライン引数を設定ファイルの値より優先する
    pub fn override_config(&self, config: &mut Config) {
        if let Some(namespace) = &self.namespace {
            config.namespace = Some(namespace.clone());
        }

        if self.logging {
            config.logging.enabled = true;
        }

        if self.debug {
            config.debug = true;
        }
    }

    pub fn kube_worker_config(&self, config: &Config) -> KubeWorkerConfig {
        let Self {
            context,
            kubeconfig,
            ..
        } = self.clone();

        KubeWorkerConfig {
            kubeconfig,
            context,
            config: config.clone(),
        }
    }

    pub fn config_load_option(&self) -> Result<ConfigLoadOption> {
        let option = if let Some(path) = &self.config_file {
            match path.try_exists() {
                Ok(true) => ConfigLoadOption::Path(path.clone()),
                Ok(false) => {
                    eprintln!("Config file not found: {:?}", path);

                    ConfigLoadOption::Default
                }
                Err(err) => {
                    eprintln!("Failed to check config file exists: {}", err);

                    ConfigLoadOption::Default
                }
            }
        } else {
            match xdg_config_home().map(|dir| dir.join("config.yaml")) {
                Some(path) => match path.try_exists() {
                    Ok(true) => ConfigLoadOption::Path(path),
                    Ok(false) => ConfigLoadOption::Default,
                    Err(err) => {
                        eprintln!("Failed to check config file exists: {}", err);

                        ConfigLoadOption::Default
                    }
                },
                None => ConfigLoadOption::Default,
            }
        };

        Ok(option)
    }
}

fn xdg_config_home() -> Option<PathBuf> {
    match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) => Some(PathBuf::from(dir).join("kustomize-operator")),
        None => dirs::home_dir().map(|home| home.join(".config").join("kustomize-operator")),
    }
}
