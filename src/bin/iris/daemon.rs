use miette::{Context, IntoDiagnostic};
use tracing::warn;

#[derive(Debug, clap::Args)]
pub struct Args {}

#[tokio::main]
pub async fn run(config: super::Config, _args: &Args) -> miette::Result<()> {
    crate::common::setup_tracing(&config.logging)?;

    let state = crate::common::setup_gateway(&config)?;

    let exit = crate::common::hook_exit_token();

    cardano_iris::serve::spawn_background_tasks(state.clone(), exit.clone());

    cardano_iris::serve::serve(config.serve, state, exit)
        .await
        .into_diagnostic()
        .context("running gateway server")?;

    warn!("shutdown complete");

    Ok(())
}
