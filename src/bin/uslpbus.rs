use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uslpbus::codec::{self, WireMessage};
use uslpbus::config::{BPCS_ENDPOINT_ENV, BSCP_ENDPOINT_ENV};
use uslpbus::epp::PROTOCOL_ID_PRIVATE;
use uslpbus::protocol::{
    SduEventKind, SduUplinkRequest, TOPIC_DOWNLINK_SDU, TOPIC_UPLINK_FRAME, TOPIC_UPLINK_SDU_EVENT,
};
use uslpbus::stack::{SPACECRAFT_ID, UPLINK_VCHANNEL_ID};
use uslpbus::{BusChannel, ChannelId, EppHeader, InboundMessage, OutboundMessage, Qos};

// PUB sockets drop messages until the broker finished subscribing
const PUBLISH_SETTLE_TIME: Duration = Duration::from_millis(300);
const LISTEN_POLL_PERIOD: Duration = Duration::from_millis(500);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("uslpbus")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Talks to the USLP server over the ground station bus")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("bpcs")
                .long("bpcs")
                .value_name("ENDPOINT")
                .help("Broker publish / client subscribe endpoint")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("bscp")
                .long("bscp")
                .value_name("ENDPOINT")
                .help("Broker subscribe / client publish endpoint")
                .takes_value(true)
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("send-sdu")
                .about("Publish one uplink SDU request")
                .arg(
                    Arg::with_name("map")
                        .long("map")
                        .value_name("ID")
                        .help("MAP channel id")
                        .takes_value(true)
                        .required(true)
                        .validator(validate_number),
                )
                .arg(
                    Arg::with_name("sc")
                        .long("sc")
                        .value_name("ID")
                        .help("Spacecraft id")
                        .takes_value(true)
                        .validator(validate_number),
                )
                .arg(
                    Arg::with_name("vc")
                        .long("vc")
                        .value_name("ID")
                        .help("Virtual channel id")
                        .takes_value(true)
                        .validator(validate_number),
                )
                .arg(
                    Arg::with_name("qos")
                        .long("qos")
                        .value_name("QOS")
                        .takes_value(true)
                        .possible_values(&["expedited", "sequence_controlled"])
                        .default_value("expedited"),
                )
                .arg(
                    Arg::with_name("cookie")
                        .long("cookie")
                        .value_name("COOKIE")
                        .help("Payload cookie, defaults to the current unix time in ms")
                        .takes_value(true)
                        .validator(validate_number),
                )
                .arg(
                    Arg::with_name("epp")
                        .long("epp")
                        .help("Wrap the SDU into an encapsulation packet"),
                )
                .arg(
                    Arg::with_name("wait")
                        .long("wait")
                        .value_name("SECONDS")
                        .help("Print events for this SDU for that long after sending")
                        .takes_value(true)
                        .validator(validate_number),
                )
                .arg(
                    Arg::with_name("data")
                        .help("SDU text, or @path to read the SDU from a file")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("listen")
                .about("Print SDU events and downlink SDUs")
                .arg(
                    Arg::with_name("format")
                        .short("f")
                        .long("format")
                        .value_name("FORMAT")
                        .takes_value(true)
                        .possible_values(&["json", "table"])
                        .default_value("table"),
                )
                .arg(
                    Arg::with_name("frames")
                        .long("frames")
                        .help("Also print uplink frames handed to the radio"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("send-sdu", Some(sub)) => handle_send_sdu(sub).await,
        ("listen", Some(sub)) => handle_listen(sub).await,
        _ => Ok(()),
    }
}

async fn handle_send_sdu(matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let channel_id = ChannelId::new(
        number_arg(matches, "sc")?.unwrap_or(SPACECRAFT_ID),
        number_arg(matches, "vc")?.unwrap_or(UPLINK_VCHANNEL_ID),
        number_arg(matches, "map")?.unwrap_or_default(),
    );
    let qos = match matches.value_of("qos") {
        Some("sequence_controlled") => Qos::SequenceControlled,
        _ => Qos::Expedited,
    };
    let cookie = match number_arg::<u64>(matches, "cookie")? {
        Some(cookie) => cookie,
        None => SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64,
    };

    let raw = matches.value_of("data").unwrap_or_default();
    let mut data = match raw.strip_prefix('@') {
        Some(path) => std::fs::read(path)?,
        None => raw.as_bytes().to_vec(),
    };
    if matches.is_present("epp") {
        data = EppHeader::wrap(PROTOCOL_ID_PRIVATE, &data)?;
    }

    let wait = number_arg::<u64>(matches, "wait")?.map(Duration::from_secs);

    let mut bus = BusChannel::new();
    if wait.is_some() {
        let bpcs = endpoint(matches, "bpcs", BPCS_ENDPOINT_ENV)?;
        bus.connect_subscribe(&bpcs, &[TOPIC_UPLINK_SDU_EVENT]).await?;
    }
    let bscp = endpoint(matches, "bscp", BSCP_ENDPOINT_ENV)?;
    bus.connect_publish(&bscp).await?;
    tokio::time::sleep(PUBLISH_SETTLE_TIME).await;

    let size = data.len();
    let request = InboundMessage::SduUplinkRequest(SduUplinkRequest {
        channel_id,
        qos,
        cookie,
        data,
    });
    bus.send(&request).await?;
    println!(
        "{} sent {} bytes to {} ({}), cookie {}",
        "✅".green(),
        size,
        channel_id.to_string().bright_white(),
        qos,
        cookie.to_string().bright_cyan()
    );

    if let Some(wait) = wait {
        let deadline = tokio::time::Instant::now() + wait;
        while tokio::time::Instant::now() < deadline {
            if !bus.poll(LISTEN_POLL_PERIOD).await? {
                continue;
            }
            if let Some(OutboundMessage::SduUplinkEvent(event)) = bus.receive::<OutboundMessage>()? {
                if event.part_cookie.cookie == cookie {
                    print_table_row(&OutboundMessage::SduUplinkEvent(event));
                }
            }
        }
    }

    bus.close().await;
    Ok(())
}

async fn handle_listen(matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let json = matches.value_of("format") == Some("json");
    let mut topics = vec![TOPIC_UPLINK_SDU_EVENT, TOPIC_DOWNLINK_SDU];
    if matches.is_present("frames") {
        topics.push(TOPIC_UPLINK_FRAME);
    }

    let bpcs = endpoint(matches, "bpcs", BPCS_ENDPOINT_ENV)?;
    let mut bus = BusChannel::new();
    bus.connect_subscribe(&bpcs, &topics).await?;
    if !json {
        println!("{}", "📡 Listening on the bus (Press Ctrl+C to stop)...".bright_blue().bold());
    }

    loop {
        let ready = tokio::select! {
            ready = bus.poll(LISTEN_POLL_PERIOD) => ready?,
            _ = tokio::signal::ctrl_c() => break,
        };
        if !ready {
            continue;
        }

        match bus.receive::<OutboundMessage>() {
            Ok(Some(message)) if json => print_json(&message)?,
            Ok(Some(message)) => print_table_row(&message),
            Ok(None) => {}
            Err(e) => eprintln!("{} {}", "⚠️".yellow(), e.to_string().bright_red()),
        }
    }

    bus.close().await;
    Ok(())
}

fn print_json(message: &OutboundMessage) -> Result<(), Box<dyn std::error::Error>> {
    let Some(raw) = codec::split_parts(message.to_parts()?)? else {
        return Ok(());
    };
    let line = serde_json::json!({
        "topic": raw.topic,
        "metadata": raw.metadata,
        "payload_size": raw.payload.len(),
    });
    println!("{}", line);
    Ok(())
}

fn print_table_row(message: &OutboundMessage) {
    match message {
        OutboundMessage::SduUplinkEvent(event) => {
            let kind = match event.event {
                SduEventKind::SduAccepted => event.event.as_str().green(),
                SduEventKind::SduRejected => event.event.as_str().red(),
                SduEventKind::SduSentToRadio => event.event.as_str().cyan(),
                SduEventKind::SduRadiated => event.event.as_str().bright_green().bold(),
                SduEventKind::SduRadiationFailed => event.event.as_str().bright_red().bold(),
            };
            println!(
                "{:<10} {:<22} {:<12} {}{}",
                "uplink".bright_white(),
                kind,
                event.channel_id.to_string(),
                event.part_cookie,
                event
                    .comment
                    .as_ref()
                    .map(|comment| format!(" ({})", comment.bright_red()))
                    .unwrap_or_default()
            );
        }
        OutboundMessage::SduDownlink(sdu) => {
            let flags = if sdu.flags.is_empty() {
                "-".normal()
            } else {
                sdu.flags.to_string().yellow()
            };
            println!(
                "{:<10} {:<22} {:<12} {} bytes, {}, flags: {}",
                "downlink".bright_blue(),
                "sdu".blue(),
                sdu.channel_id.to_string(),
                sdu.data.len(),
                sdu.qos,
                flags
            );
            if let Ok(text) = std::str::from_utf8(&sdu.data) {
                println!("{:<10} {}", "", text.bright_white());
            }
        }
        OutboundMessage::RadioUplinkFrame(frame) => {
            println!(
                "{:<10} {:<22} {:<12} {} bytes",
                "radio".magenta(),
                "uplink_frame".magenta(),
                frame.cookie.to_string(),
                frame.data.len()
            );
        }
    }
}

fn endpoint(
    matches: &ArgMatches<'_>,
    flag: &str,
    env_key: &'static str,
) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(value) = matches.value_of(flag) {
        return Ok(value.to_string());
    }
    match std::env::var(env_key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(format!("there is no --{} flag and no {} envvar", flag, env_key).into()),
    }
}

fn parse_number(value: &str) -> Option<u64> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn validate_number(value: String) -> Result<(), String> {
    parse_number(&value)
        .map(|_| ())
        .ok_or_else(|| format!("'{}' is not a number", value))
}

fn number_arg<T: TryFrom<u64>>(
    matches: &ArgMatches<'_>,
    name: &str,
) -> Result<Option<T>, Box<dyn std::error::Error>> {
    let Some(value) = matches.value_of(name) else {
        return Ok(None);
    };
    let number = parse_number(value).ok_or_else(|| format!("'{}' is not a number", value))?;
    T::try_from(number)
        .map(Some)
        .map_err(|_| format!("--{} value {} is out of range", name, value).into())
}
