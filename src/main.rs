use clap::Parser;
use ldap_tap::config::Config;
use ldap_tap::server::{listen_url_is_tls, ProxyServer};
use ldap_tap::script::ScriptSink;
use ldap_tap::session::LogSink;
use ldap_tap::tls;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use anyhow::{Context, Result};
use tokio_rustls::TlsAcceptor;

#[derive(Parser)]
#[command(name = "ldap-tap")]
#[command(about = "Intercepting LDAP proxy - decodes traffic for diagnostics and generates SLAMD job scripts")]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen URL (overrides config; e.g. ldap://:1389)
    #[arg(short = 'l', long, value_name = "URL")]
    listen: Option<String>,

    /// Directory server host (overrides config)
    #[arg(short = 'H', long, value_name = "HOST")]
    host: Option<String>,

    /// Directory server port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Decode log file (stdout when absent)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Generate a SLAMD job script at this path
    #[arg(short, long, value_name = "FILE")]
    script: Option<PathBuf>,

    /// Include a hex dump of every message in the decode log
    #[arg(long)]
    raw_bytes: bool,

    /// Use TLS for the server leg
    #[arg(long)]
    server_tls: bool,

    /// Skip server certificate verification on the server leg
    #[arg(long)]
    server_skip_verify: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("ldap_tap={},info", log_level))
        .init();

    let mut config = match &args.config {
        Some(path) => {
            info!("Configuration source: file {:?}", path);
            Config::from_file(path)?
        }
        None => Config::default(),
    };

    // CLI flags override the config file
    if let Some(listen) = args.listen {
        config.listen.url = listen;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.server_tls {
        config.server.use_tls = Some(true);
    }
    if args.server_skip_verify {
        config.server.skip_verify = Some(true);
    }
    if args.raw_bytes {
        config.output.raw_bytes = true;
    }
    if let Some(output) = args.output {
        config.output.log_file = Some(output.to_string_lossy().into_owned());
    }
    if let Some(script) = args.script {
        config.script = Some(ldap_tap::config::ScriptConfig {
            file: script.to_string_lossy().into_owned(),
        });
    }

    info!("Configuration loaded:");
    info!("  Listen URL: {}", config.listen.url);
    info!("  Server: {}:{}", config.server.host, config.server.port);
    info!("  Raw bytes: {}", config.output.raw_bytes);

    let log_writer: Box<dyn Write + Send> = match &config.output.log_file {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Create decode log {}", path))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    let log = Arc::new(LogSink::new(log_writer, config.output.raw_bytes));

    let script = match &config.script {
        Some(script_cfg) => {
            let file = File::create(&script_cfg.file)
                .with_context(|| format!("Create script file {}", script_cfg.file))?;
            let sink = Arc::new(ScriptSink::new(Box::new(file)));
            sink.write_preamble(
                &config.server.host,
                config.server.port,
                config.server.use_tls.unwrap_or(false),
            )?;
            info!("  Script file: {}", script_cfg.file);
            Some(sink)
        }
        None => None,
    };

    let tls_acceptor = if listen_url_is_tls(&config.listen.url) {
        let tls_cfg = config
            .tls
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("LDAPS (ldaps://) requires tls section in config"))?;
        tls::validate_tls_files(&tls_cfg.cert_file, &tls_cfg.key_file)?;
        let server_config =
            tls::load_server_config_from_files(&tls_cfg.cert_file, &tls_cfg.key_file)?;
        info!("TLS enabled for listener");
        Some(TlsAcceptor::from(server_config))
    } else {
        None
    };

    let server = ProxyServer::new(
        config.listen.url.clone(),
        config.server.clone(),
        tls_acceptor,
        log,
        script,
    );

    server.start().await?;

    Ok(())
}
