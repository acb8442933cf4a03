#![warn(
    rust_2024_compatibility,
    clippy::all,
    clippy::future_not_send,
    clippy::mod_module_files,
    clippy::needless_pass_by_ref_mut,
    clippy::unused_async
)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};
use rama::{
    Layer as RamaLayer,
    graceful::Shutdown,
    http::{layer::trace::TraceLayer, server::HttpServer},
    layer::ConsumeErrLayer,
    rt::Executor,
    tcp::server::TcpListener,
};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use hubp::config::{self, Config};
use hubp::proxy::RegistryProxy;

#[derive(Debug, Parser)]
#[command(author, version, about = "Transparent container registry proxy")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the registry proxy
    Serve {
        /// Path to the configuration file
        #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Load and validate the configuration, then print the effective settings
    CheckConfig {
        /// Path to the configuration file
        #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Debug, Default, clap::Args)]
struct Overrides {
    /// Listen host
    #[arg(short, long, env = "HUBP_LISTEN")]
    listen: Option<String>,
    /// Listen port
    #[arg(short, long, env = "HUBP_PORT")]
    port: Option<u16>,
    /// Log filter, e.g. `info` or `hubp=debug`
    #[arg(long, env = "HUBP_LOG_LEVEL")]
    log_level: Option<String>,
    /// Host that receives non-registry traffic
    #[arg(short = 'w', long, env = "HUBP_DISGUISE")]
    disguise: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.listen {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(host) = self.disguise {
            config.disguise.host = host;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, overrides } => run_server(config, overrides),
        Command::CheckConfig { config, overrides } => run_check_config(config, overrides),
    }
}

fn load_config(path: PathBuf, overrides: Overrides) -> Result<Config> {
    let mut config = Config::load(Some(path)).context("loading configuration")?;
    overrides.apply(&mut config);
    config.validate().context("validating configuration")?;
    Ok(config)
}

fn run_server(config_path: PathBuf, overrides: Overrides) -> Result<()> {
    let config = Arc::new(load_config(config_path, overrides)?);
    init_tracing(&config)?;

    let proxy = RegistryProxy::new(config.clone()).context("creating proxy service")?;

    let rt_server = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers)
        .enable_all()
        .build()
        .context("constructing server runtime")?;

    rt_server.block_on(async move {
        let graceful = Shutdown::default();
        let addr = config.server.listen_addr();
        let disguise = if config.disguise.enabled {
            config.disguise.host.as_str()
        } else {
            "off"
        };

        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            %addr,
            registry = %config.upstream.registry_url,
            auth = %config.upstream.auth_url,
            disguise,
            "starting registry proxy"
        );

        let tcp_service = TcpListener::build()
            .bind(addr.clone())
            .await
            .map_err(|err| anyhow::anyhow!("binding {addr}: {err}"))?;

        graceful.spawn_task_fn(move |guard| {
            async move {
                let exec = Executor::graceful(guard.clone());
                let http_service = HttpServer::auto(exec).service(
                    (TraceLayer::new_for_http(), ConsumeErrLayer::default()).into_layer(proxy),
                );

                tcp_service.serve_graceful(guard, http_service).await;
            }
        });

        // Wait for ctrl+c to initiate graceful shutdown
        tokio::signal::ctrl_c()
            .await
            .context("listening for shutdown signal")?;

        graceful
            .shutdown_with_limit(Duration::from_secs(30))
            .await?;

        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn run_check_config(config_path: PathBuf, overrides: Overrides) -> Result<()> {
    let config = load_config(config_path, overrides)?;

    println!("Listen:            {}", config.server.listen_addr());
    println!("Workers:           {}", config.server.workers);
    println!("Registry:          {}", config.upstream.registry_url);
    println!("Auth endpoint:     {}", config.upstream.auth_url);
    println!("Path prefix:       {}", config.upstream.path_prefix);
    println!("Timeout:           {}s", config.upstream.timeout_secs);
    println!("Max redirect hops: {}", config.upstream.max_hops);
    println!("Token TTL:         {}s", config.upstream.token_ttl_secs);
    println!(
        "Cross-origin auth: {}",
        if config.upstream.strip_auth_on_cross_origin {
            "stripped"
        } else {
            "forwarded"
        }
    );
    if config.disguise.enabled {
        println!("Disguise:          {}", config.disguise.host);
    } else {
        println!("Disguise:          disabled");
    }
    match &config.spool.dir {
        Some(dir) => println!("Spool directory:   {}", dir.display()),
        None => println!("Spool directory:   {}", std::env::temp_dir().display()),
    }
    println!("Log level:         {}", config.logging.level);
    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = config.logging.env_filter().context("building log filter")?;

    let fmt_layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        use opentelemetry_otlp::WithExportConfig;

        let resource = Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", "hubp"),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ])
            .build();

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()?;

        let provider = sdktrace::SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build();

        let tracer = provider.tracer("hubp");
        global::set_tracer_provider(provider);

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    } else {
        registry.try_init()?;
    }
    Ok(())
}
