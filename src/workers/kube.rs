use std::path::PathBuf;

use anyhow::Result;
use crossbeam::channel::Sender;
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Api, Client,
};
use tokio::runtime::Runtime;

use crate::{
    api::v1alpha1::Kustomization,
    config::Config,
    kube::KubeClient,
    kustomize::{KustomizeCommand, KustomizeOptions},
    logger,
    operator::{KustomizationWatcher, Reconciler},
    panic_set_hook,
};

#[derive(Debug, Default, Clone)]
pub struct KubeWorkerConfig {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub config: Config,
}

#[derive(Debug, Clone)]
pub struct KubeWorker {
    tx_shutdown: Sender<Result<()>>,
    config: KubeWorkerConfig,
}

impl KubeWorker {
    pub fn new(tx_shutdown: Sender<Result<()>>, config: KubeWorkerConfig) -> Self {
        KubeWorker {
            tx_shutdown,
            config,
        }
    }

    pub fn start(self) {
        logger!(info, "KubeWorker start");

        let ret = match Runtime::new() {
            Ok(rt) => rt.block_on(start_operator(self.config)),
            Err(err) => Err(err.into()),
        };

        if let Err(e) = &ret {
            logger!(error, "{:#}", e);
        }

        logger!(info, "KubeWorker end");

        if self.tx_shutdown.send(ret).is_err() {
            logger!(error, "failed to send shutdown signal");
        }
    }

    pub fn set_panic_hook(&self) {
        let tx_shutdown = self.tx_shutdown.clone();

        panic_set_hook!({
            let _ = tx_shutdown.try_send(Err(anyhow::anyhow!("panic occurred in KubeWorker worker")));
        });
    }
}

/// kubeconfig もコンテキストも指定されていなければ in-cluster / `~/.kube/config` から推測する
async fn build_client(kubeconfig: Option<PathBuf>, context: Option<String>) -> Result<Client> {
    let config = if kubeconfig.is_none() && context.is_none() {
        kube::Config::infer().await?
    } else {
        let kubeconfig = match kubeconfig {
            Some(path) => Kubeconfig::read_from(path)?,
            None => Kubeconfig::read()?,
        };

        let options = KubeConfigOptions {
            context,
            ..Default::default()
        };

        kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?
    };

    Ok(Client::try_from(config)?)
}

async fn start_operator(worker_config: KubeWorkerConfig) -> Result<()> {
    let KubeWorkerConfig {
        kubeconfig,
        context,
        config,
    } = worker_config;

    let client = build_client(kubeconfig, context).await?;

    let api: Api<Kustomization> = match &config.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    logger!(
        info,
        "watching kustomizations in {}",
        config.namespace.as_deref().unwrap_or("all namespaces")
    );

    let reconciler = Reconciler::new(
        KubeClient::new(client),
        KustomizeCommand::new(&config.kustomize_bin, config.debug),
        KustomizeOptions::from(&config),
    );

    KustomizationWatcher::new(api, reconciler)
        .timeout_secs(config.watch.timeout_secs)
        .run()
        .await
}
