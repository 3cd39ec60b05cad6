use clap::{App, Arg};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;
use uslpbus::config::{BridgeConfig, BPCS_ENDPOINT_ENV, BSCP_ENDPOINT_ENV};
use uslpbus::protocol::INBOUND_TOPICS;
use uslpbus::shutdown;
use uslpbus::stack::{ground_input_stack, ground_output_stack, InputStack, OutputStack};
use uslpbus::{BusChannel, Dispatcher, DispatcherConfig, InboundMessage};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("uslp-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bridges the ground station bus and the USLP radio link")
        .arg(
            Arg::with_name("bpcs")
                .long("bpcs")
                .value_name("ENDPOINT")
                .help("Broker publish / client subscribe endpoint")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("bscp")
                .long("bscp")
                .value_name("ENDPOINT")
                .help("Broker subscribe / client publish endpoint")
                .takes_value(true),
        )
        .get_matches();

    let bpcs = matches.value_of("bpcs").map(str::to_string);
    let bscp = matches.value_of("bscp").map(str::to_string);
    let config = match BridgeConfig::from_lookup(|key| match key {
        BPCS_ENDPOINT_ENV if bpcs.is_some() => bpcs.clone(),
        BSCP_ENDPOINT_ENV if bscp.is_some() => bscp.clone(),
        _ => std::env::var(key).ok(),
    }) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("unable to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("uslp server failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    debug!("config: {}", serde_json::to_string(&config)?);
    let (trigger, mut shutdown) = shutdown::channel();
    let signals = shutdown::spawn_signal_listener(trigger)?;

    let mut bus = BusChannel::new();
    bus.connect_subscribe(&config.bpcs_endpoint, &INBOUND_TOPICS).await?;
    bus.connect_publish(&config.bscp_endpoint).await?;

    let mut dispatcher = Dispatcher::new(
        ground_output_stack(),
        ground_input_stack(),
        DispatcherConfig {
            frame_timeout: config.frame_timeout,
        },
    );
    info!(
        "uslp server started, poll period {:?}, frame timeout {:?}",
        config.poll_period, config.frame_timeout
    );

    while !shutdown.is_requested() {
        let ready = tokio::select! {
            result = bus.poll(config.poll_period) => result,
            _ = shutdown.requested() => Ok(false),
        };

        match ready {
            Ok(true) => match bus.receive::<InboundMessage>() {
                Ok(Some(message)) => {
                    trace!("dispatching {}", message.kind());
                    dispatcher.dispatch(message, Instant::now());
                }
                Ok(None) => {}
                Err(e) => error!("dropping bus message: {}", e),
            },
            Ok(false) => {}
            Err(e) => error!("bus poll failed: {}", e),
        }

        dispatcher.sweep_timeouts(Instant::now());
        publish_outbound(&mut bus, &mut dispatcher).await;
    }

    match serde_json::to_string(&dispatcher.stats()) {
        Ok(stats) => info!("dispatcher stats: {}", stats),
        Err(e) => warn!("unable to serialize dispatcher stats: {}", e),
    }
    if !dispatcher.frames().is_empty() {
        warn!("{} frames still awaiting radio reports at shutdown", dispatcher.frames().len());
    }

    signals.abort();
    bus.close().await;
    info!("uslp server stopped");
    Ok(())
}

async fn publish_outbound<O: OutputStack, I: InputStack>(
    bus: &mut BusChannel,
    dispatcher: &mut Dispatcher<O, I>,
) {
    for message in dispatcher.take_outbound() {
        if let Err(e) = bus.send(&message).await {
            error!("unable to publish {}: {}", message.kind(), e);
        }
    }
}
