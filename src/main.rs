use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hid_injector::config::{AppConfig, ConfigStore, GadgetBackend};
use hid_injector::events::EventBus;
use hid_injector::gadget::runner::scripted_events;
use hid_injector::gadget::{
    run_bus_events, BusEvent, DescriptorSet, GadgetSession, RawGadget, RawGadgetConfig,
    SimulatedUdc, UdcDriver,
};
use hid_injector::payload::PayloadSlot;
use hid_injector::state::AppState;
use hid_injector::surface::ControlSurface;
use hid_injector::trigger::{self, GpioTrigger};
use hid_injector::utils::bind_tcp_listener;
use hid_injector::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// hid-injector command line arguments
#[derive(Parser, Debug)]
#[command(name = "hid-injector")]
#[command(version, about = "USB HID keyboard gadget with staged keystroke injection", long_about = None)]
struct CliArgs {
    /// Listen address (overrides database config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides database config)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Data directory path (default: /etc/hid-injector)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Use the in-memory controller instead of raw-gadget
    #[arg(long)]
    simulate: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting hid-injector v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let db_path = data_dir.join("hid-injector.db");
    let config_store = ConfigStore::new(&db_path).await?;
    let config = config_store.get();

    let events = Arc::new(EventBus::new());
    let payload = Arc::new(PayloadSlot::new());
    let surface = ControlSurface::new(config.inject.pacing());
    let (trigger_handle, trigger_rx) = trigger::channel();
    let shutdown = CancellationToken::new();

    let state = AppState::new(
        config_store,
        events.clone(),
        payload,
        surface.clone(),
        trigger_handle.clone(),
        shutdown.clone(),
        data_dir,
    );

    // Gadget session
    let backend = if args.simulate {
        GadgetBackend::Simulated
    } else {
        config.gadget.backend
    };
    let (bus, bus_rx) = open_backend(backend, &config)?;
    let descriptors = Arc::new(DescriptorSet::new(&config.gadget.identity()));
    let session = GadgetSession::bind(
        bus,
        descriptors,
        config.gadget.session_options(),
        Some(events.clone()),
    )?;
    let registration = surface.attach(&session);

    // Trigger sources
    let trigger_task = tokio::spawn(trigger::run_trigger_loop(
        state.clone(),
        trigger_rx,
        shutdown.clone(),
    ));
    let _gpio = if config.trigger.enabled {
        match GpioTrigger::start(&config.trigger, trigger_handle) {
            Ok(gpio) => Some(gpio),
            Err(e) => {
                tracing::warn!("GPIO trigger unavailable: {}", e);
                None
            }
        }
    } else {
        tracing::info!("GPIO trigger disabled");
        None
    };

    spawn_signal_handler(shutdown.clone());

    let bus_loop = run_bus_events(&session, bus_rx, shutdown.clone());
    let server = serve_web(state.clone(), &config, &args, shutdown.clone());

    let (stats, server_result) = tokio::join!(bus_loop, server);
    tracing::info!(
        "Bus events handled: {} control, {} stalled, {} disconnects",
        stats.control,
        stats.stalled,
        stats.disconnects
    );

    // The bus loop may end on its own (scripted host); the server ends on shutdown
    shutdown.cancel();
    if let Err(e) = trigger_task.await {
        tracing::warn!("Trigger loop ended abnormally: {}", e);
    }

    drop(registration);
    session.unbind().await;

    server_result?;
    tracing::info!("Shutdown complete");
    Ok(())
}

type Backend = (Arc<dyn UdcDriver>, mpsc::Receiver<BusEvent>);

fn open_backend(backend: GadgetBackend, config: &AppConfig) -> anyhow::Result<Backend> {
    match backend {
        GadgetBackend::Simulated => {
            tracing::info!("Using simulated controller");
            let bus: Arc<dyn UdcDriver> = Arc::new(SimulatedUdc::default());
            Ok((bus, scripted_events(SimulatedUdc::enumeration_script())))
        }
        GadgetBackend::Raw => {
            let raw_config = RawGadgetConfig::resolve(
                config.gadget.raw_gadget_path(),
                &config.gadget.udc_driver,
                &config.gadget.udc_device,
            )?;
            tracing::info!(
                "Using raw-gadget at {} on {} ({})",
                raw_config.path.display(),
                raw_config.device,
                raw_config.driver
            );
            let (gadget, rx) = RawGadget::open(&raw_config)?;
            let bus: Arc<dyn UdcDriver> = Arc::new(gadget);
            Ok((bus, rx))
        }
    }
}

async fn serve_web(
    state: Arc<AppState>,
    config: &AppConfig,
    args: &CliArgs,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if !config.web.enabled {
        tracing::info!("Web server disabled");
        shutdown.cancelled().await;
        return Ok(());
    }

    let address = args
        .address
        .clone()
        .unwrap_or_else(|| config.web.bind_address.clone());
    let ip: IpAddr = address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", address))?;
    let port = args.http_port.unwrap_or(config.web.http_port);

    let listener = bind_tcp_listener(SocketAddr::new(ip, port))?;
    let listener = tokio::net::TcpListener::from_std(listener)?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let app = web::create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!("Failed to listen for CTRL+C: {}", e);
                    return;
                }
            }
            _ = terminate => {}
            _ = shutdown.cancelled() => return,
        }
        tracing::info!("Shutdown signal received");
        shutdown.cancel();
    });
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "hid_injector=error,tower_http=error",
        LogLevel::Warn => "hid_injector=warn,tower_http=warn",
        LogLevel::Info => "hid_injector=info,tower_http=info",
        LogLevel::Verbose => "hid_injector=debug,tower_http=info",
        LogLevel::Debug => "hid_injector=debug,tower_http=debug",
        LogLevel::Trace => "hid_injector=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("HID_INJECTOR_DATA_DIR") {
        return PathBuf::from(path);
    }
    PathBuf::from("/etc/hid-injector")
}
