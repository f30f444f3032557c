use agent::config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (cli, config) = Cli::load();
    simple_logger::init_with_level(config.log.level.as_level())?;

    log::info!(
        "starting agent: gateway={} mappings={}",
        config.server.base_url(),
        config.port_mappings.len()
    );

    let _handle = agent::run(config, cli.config).await?;

    tokio::signal::ctrl_c().await?;
    log::info!("shutdown requested");

    Ok(())
}
