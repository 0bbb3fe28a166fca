use anyhow::Result;
use shuttle_config::Config;
use shuttle_statsd::MetricsClientConfig;

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        shuttle_log::info!("launching shuttle without config folder");
    } else {
        shuttle_log::info!(
            "launching shuttle from config folder {}",
            config.path().display()
        );
    }
    shuttle_log::info!("  listen address: {}", config.listen_addr());
    shuttle_log::info!("  outlet url: {}", config.outlet_url());
    shuttle_log::info!("  log level: {}", config.logging().level.level_filter());
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }

    shuttle_statsd::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host,
        default_tags,
    })?;

    Ok(())
}
