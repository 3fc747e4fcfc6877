use clap::Parser;
use log::{error, info};
use pingora::prelude::*;
use pingora::server::configuration::Opt;
use pingora_proxy::http_proxy_service;
use pingora_waf_filter::*;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/waf_filter.yaml")]
    config: String,

    /// Upstream backend host
    #[arg(short = 'u', long)]
    upstream_host: Option<String>,

    /// Upstream backend port
    #[arg(short = 'p', long)]
    upstream_port: Option<u16>,

    /// Listening address
    #[arg(short = 'l', long, default_value = "0.0.0.0")]
    listen_addr: String,

    /// Listening port
    #[arg(short = 'P', long, default_value = "6188")]
    listen_port: u16,

    /// Metrics port
    #[arg(short = 'm', long, default_value = "6190")]
    metrics_port: u16,

    /// Reload the configuration file when it changes
    #[arg(short = 'w', long)]
    watch: bool,
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    info!("Starting Pingora WAF filter...");
    info!("Loading configuration from: {}", args.config);

    let configuration = reload_config(&args.config).unwrap_or_else(|e| {
        error!("Failed to load configuration from {}: {}", args.config, e);
        error!("Using default configuration");
        fallback_configuration()
    });
    info!(
        "Configuration loaded: default directive '{}', log format {}",
        configuration.default_directive(),
        configuration.log_format()
    );
    let shared = SharedConfiguration::new(configuration);

    let mut watcher = ConfigWatcher::new(&args.config);
    if args.watch {
        if let Err(e) = watcher.watch_into(shared.clone()) {
            error!("Hot reload disabled: {}", e);
        }
    }

    let metrics = Arc::new(MetricsCollector::new());

    let upstream_host = args
        .upstream_host
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let upstream_port = args.upstream_port.unwrap_or(8080);
    info!("Upstream backend: {}:{}", upstream_host, upstream_port);

    let waf_proxy = WafProxy::new((upstream_host.clone(), upstream_port), shared, metrics);

    let mut server = match Server::new(Some(Opt::default())) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to create server: {}", e);
            std::process::exit(1);
        }
    };
    server.bootstrap();

    let mut proxy_service = http_proxy_service(&server.configuration, waf_proxy);
    let listen_address = format!("{}:{}", args.listen_addr, args.listen_port);
    proxy_service.add_tcp(&listen_address);
    server.add_service(proxy_service);

    // Pingora's built-in Prometheus service exports the default registry
    let metrics_address = format!("{}:{}", args.listen_addr, args.metrics_port);
    let mut prometheus_service_http =
        pingora::services::listening::Service::prometheus_http_service();
    prometheus_service_http.add_tcp(&metrics_address);
    server.add_service(prometheus_service_http);

    info!("WAF filter:   http://{}", listen_address);
    info!("Metrics:      http://{}/metrics", metrics_address);
    info!("Upstream:     {}:{}", upstream_host, upstream_port);
    info!("Config:       {} (hot reload {})", args.config, if watcher.is_enabled() { "on" } else { "off" });

    server.run_forever();
}

fn fallback_configuration() -> Configuration {
    match Configuration::build(&FilterConfig::default()) {
        Ok(configuration) => configuration,
        Err(e) => {
            error!("Default configuration is invalid: {}", e);
            std::process::exit(1);
        }
    }
}
