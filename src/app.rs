use std::thread;

use anyhow::Result;
use crossbeam::channel::bounded;

use crate::{cmd::Command, config::Config, logger, signal::signal_handler, workers::KubeWorker};

pub struct App;

impl App {
    pub fn run(cmd: Command, config: Config) -> Result<()> {
        let kube_worker_config = cmd.kube_worker_config(&config);

        let (tx_shutdown, rx_shutdown) = bounded::<Result<()>>(1);

        signal_handler(tx_shutdown.clone())?;

        let kube = KubeWorker::new(tx_shutdown.clone(), kube_worker_config);

        logger!(info, "app start");
        logger!(debug, "config: {:?}", config);

        thread::spawn(move || {
            kube.set_panic_hook();
            kube.start();
        });

        let result = rx_shutdown.recv()?;

        logger!(info, "app end");

        result
    }
}
