use anyhow::Result;
use crossbeam::channel::Sender;

use crate::logger;

/// SIGINT / SIGTERM を受けたら正常終了を通知する
pub fn signal_handler(tx_shutdown: Sender<Result<()>>) -> Result<()> {
    ctrlc::set_handler(move || {
        logger!(info, "received shutdown signal");

        let _ = tx_shutdown.try_send(Ok(()));
    })?;

    Ok(())
}
