use anyhow::Result;

use kustomize_operator::{app::App, cmd::Command, config::Config, logging::Logger};

fn main() -> Result<()> {
    let cmd = Command::init();

    if let Some(subcommand) = cmd.subcommand.clone() {
        return subcommand.run();
    }

    let mut config = Config::load(cmd.config_load_option()?)?;

    cmd.override_config(&mut config);

    if config.logging.enabled {
        Logger::init()?;
    }

    App::run(cmd, config)
}
