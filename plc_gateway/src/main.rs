use clap::{Parser, Subcommand};
use plc_gateway::api::rest::{create_api_routes, SharedAppState};
use plc_gateway::channel::{Channel, ChannelManager, TagWriter};
use plc_gateway::config::settings::{ProcessorKind, Settings};
use plc_gateway::drivers::create_driver;
use plc_gateway::logging::init_logging;
use plc_gateway::schema::{flatten_block, to_toml_rows};
use plc_gateway::tags::engine::TagEngine;
use plc_gateway::tags::transform::ValueTransformer;
use plc_gateway::triggers::dispatcher::{TriggerDispatcher, TriggerMapping};
use plc_gateway::triggers::processor::{
    AcknowledgeProcessor, ProcessorRegistry, ResultTargets, ResultWriter,
    StaticWorkOrderLookup, StaticWorkstationResolver, WorkOrderCheckProcessor,
    WorkstationProcessor,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "config.toml";

#[derive(Debug, Parser)]
#[command(author, version, about = "PLC data block gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll the configured devices and serve the monitoring API.
    Run {
        /// Settings file.
        #[arg(default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Print `[[tags]]` rows generated from a data block source file.
    ImportSchema {
        /// Block source exported from the engineering tool.
        file: PathBuf,
        /// Device the generated tags belong to.
        device_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::ImportSchema { file, device_id }) => import_schema(&file, &device_id),
        Some(Commands::Run { config }) => run(config).await,
        None => run(PathBuf::from(DEFAULT_CONFIG)).await,
    }
}

async fn run(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let start_time = Instant::now();

    // --- Load Configuration ---
    let settings = match Settings::load(&config_path) {
        Ok(s) => {
            init_logging(&s.logging.level);
            s
        }
        Err(e) => {
            init_logging("info");
            error!(
                "FATAL: Failed to load configuration from {:?}: {}",
                config_path, e
            );
            std::process::exit(1);
        }
    };
    info!("PLC Gateway starting...");
    if let Err(e) = settings.validate() {
        error!("FATAL: Invalid configuration: {}", e);
        std::process::exit(1);
    }
    let tag_configs = match settings.expanded_tags() {
        Ok(tags) => tags,
        Err(e) => {
            error!("FATAL: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.validate_triggers(tag_configs.iter().map(|t| t.name.as_str())) {
        error!("FATAL: Invalid configuration: {}", e);
        std::process::exit(1);
    }
    info!(
        "Configuration loaded: {} devices, {} tags, {} triggers",
        settings.devices.len(),
        tag_configs.len(),
        settings.triggers.len()
    );

    // --- Register Tags ---
    let tag_engine = TagEngine::new();
    for tag_config in &tag_configs {
        tag_engine.register_tag(tag_config.to_tag());
    }
    info!("{} tags registered in Tag Engine.", tag_engine.len());

    // --- Initialize Drivers and Channels ---
    let transformer = Arc::new(ValueTransformer::new());
    let mut channels = Vec::with_capacity(settings.devices.len());
    for driver_config in &settings.devices {
        info!(
            "Initializing driver: {} ({}, {})",
            driver_config.name, driver_config.id, driver_config.driver_type
        );
        let driver = match create_driver(driver_config) {
            Ok(driver) => driver,
            Err(e) => {
                error!("FATAL: {}", e);
                std::process::exit(1);
            }
        };
        let tags = tag_engine.tags_for_driver(&driver_config.id);
        if tags.is_empty() {
            warn!("Device '{}' has no tags", driver_config.id);
        }
        channels.push(Arc::new(Channel::new(
            driver,
            tags,
            Arc::clone(&transformer),
            tag_engine.clone(),
        )));
    }
    let channels = Arc::new(ChannelManager::new(channels));

    // --- Trigger Dispatch ---
    let dispatcher = Arc::new(build_dispatcher(&settings, &tag_engine, &channels));
    dispatcher.start(tag_engine.subscribe());
    channels.start_all();
    info!("{} channels started.", channels.channels().len());

    // --- Start API Server ---
    let shutdown = CancellationToken::new();
    if settings.api.enabled {
        let app_state = SharedAppState {
            tag_engine: tag_engine.clone(),
            channels: Arc::clone(&channels),
            dispatcher: Arc::clone(&dispatcher),
            start_time,
        };
        let app = create_api_routes().with_state(app_state);
        let listener = tokio::net::TcpListener::bind(&settings.api.bind_address).await?;
        info!("API server listening on {}", settings.api.bind_address);
        let token = shutdown.clone();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!("API server failed: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.cancel();
    dispatcher.stop();
    channels.stop_all().await;
    info!("PLC Gateway stopped");
    Ok(())
}

fn build_dispatcher(
    settings: &Settings,
    tag_engine: &TagEngine,
    channels: &Arc<ChannelManager>,
) -> TriggerDispatcher {
    let targets: HashMap<String, ResultTargets> = settings
        .triggers
        .iter()
        .map(|trigger| {
            let defaults = ResultTargets::for_equipment(&trigger.equipment_code);
            let targets = ResultTargets {
                result_tag: trigger.result_tag.clone().unwrap_or(defaults.result_tag),
                message_tag: trigger.message_tag.clone().or(defaults.message_tag),
            };
            (trigger.equipment_code.clone(), targets)
        })
        .collect();
    let writer: Arc<dyn TagWriter> = Arc::clone(channels) as Arc<dyn TagWriter>;
    let results = ResultWriter::new(writer, targets);

    let work_orders = Arc::new(StaticWorkOrderLookup::new());
    for order in &settings.work_orders {
        work_orders.insert(order.serial_number.clone(), order.status);
    }

    let mut registry = ProcessorRegistry::builder();
    for processor in &settings.dispatcher.processors {
        let handler: Arc<dyn WorkstationProcessor> = match processor.kind {
            ProcessorKind::Acknowledge => Arc::new(AcknowledgeProcessor::new(results.clone())),
            ProcessorKind::WorkOrderCheck => Arc::new(WorkOrderCheckProcessor::new(
                tag_engine.clone(),
                work_orders.clone(),
                results.clone(),
                processor.serial_tag.clone(),
                Duration::from_millis(processor.lookup_timeout_ms),
            )),
        };
        registry = registry.register(processor.workstation_type.clone(), handler);
    }

    let mappings = settings
        .triggers
        .iter()
        .map(|trigger| {
            TriggerMapping::new(
                trigger.equipment_code.clone(),
                trigger.tag.clone(),
                trigger.condition.clone(),
                trigger.priority,
            )
        })
        .collect();

    TriggerDispatcher::new(
        mappings,
        Arc::new(StaticWorkstationResolver::from_config(&settings.workstations)),
        registry.build(),
        results,
        settings.dispatcher.reset_result_on_idle,
    )
}

fn import_schema(file: &Path, device_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    init_logging("warn");
    let text = std::fs::read_to_string(file)?;
    let tags = flatten_block(&text)?;
    print!("{}", to_toml_rows(device_id, &tags)?);
    Ok(())
}
