use gateway::config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (cli, config) = Cli::load();
    simple_logger::init_with_level(config.log.level.as_level())?;

    log::info!(
        "starting gateway: web_port={} data_plane_port={}",
        config.server.web_port,
        config.server.data_plane_port
    );

    let _handle = gateway::run(config, cli.config).await?;

    tokio::signal::ctrl_c().await?;
    log::info!("shutdown requested, draining active sessions");

    Ok(())
}
