use clap::{Arg, ArgAction, Command};
use log::{error, info};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use scriptsniff::{
    Config, Result, SniffError,
    fingerprint::{FingerprintEngine, SignatureRegistry, Tokenizer},
    network::{CaptureSink, CaptureSupervisor, PacketSource},
    utils::{format_timestamp, generate_session_id},
};

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Configuration file path")
        .default_value("config/default.json")
}

fn url_arg() -> Arg {
    Arg::new("url")
        .short('u')
        .long("url")
        .value_name("URL")
        .help("Script URL to analyze")
        .required(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("scriptsniff")
        .version("0.1.0")
        .about("Passive HTTP capture and third-party script fingerprinting")
        .subcommand(
            Command::new("capture")
                .about("Capture plain HTTP traffic on one or more interfaces")
                .arg(
                    Arg::new("interface")
                        .short('i')
                        .long("interface")
                        .value_name("INTERFACES")
                        .help("Comma-separated interfaces (default: every device with an address)")
                )
                .arg(config_arg())
        )
        .subcommand(
            Command::new("devices")
                .about("List capture devices")
        )
        .subcommand(
            Command::new("tokenize")
                .about("Extract the structural tokens of a script URL")
                .arg(url_arg())
                .arg(config_arg())
        )
        .subcommand(
            Command::new("match")
                .about("Match a script URL against the signature registry")
                .arg(url_arg())
                .arg(config_arg())
        )
        .subcommand(
            Command::new("fingerprint")
                .about("Compute content and combined fingerprints for a script")
                .arg(url_arg())
                .arg(
                    Arg::new("body")
                        .short('b')
                        .long("body")
                        .value_name("FILE")
                        .help("Read the script body from a file")
                        .conflicts_with("fetch")
                )
                .arg(
                    Arg::new("fetch")
                        .long("fetch")
                        .action(ArgAction::SetTrue)
                        .help("Download the script body from the URL")
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Also write the result as JSON")
                )
                .arg(config_arg())
        )
        .get_matches();

    let config_path = matches
        .subcommand()
        .and_then(|(_, sub)| sub.try_get_one::<String>("config").ok().flatten())
        .cloned()
        .unwrap_or_else(|| "config/default.json".to_string());
    // Log level comes from the config.
    let config = Config::load_or_default(&config_path)?;
    init_logging(&config.logging.level);
    if !Path::new(&config_path).exists() {
        info!("Config file {} not found, using defaults", config_path);
    }

    match matches.subcommand() {
        Some(("capture", sub_matches)) => {
            let interfaces = sub_matches.get_one::<String>("interface").map(|list| {
                list.split(',')
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect::<Vec<_>>()
            });
            run_capture_mode(config, interfaces).await?;
        }
        Some(("devices", _)) => {
            run_devices_mode()?;
        }
        Some(("tokenize", sub_matches)) => {
            let url = required(sub_matches, "url")?;
            let tokenizer = Tokenizer::new(config.fingerprint.hex_run_threshold);
            println!("URL: {}", url);
            println!("Extracted Tokens: {:?}", tokenizer.tokenize(url, None));
        }
        Some(("match", sub_matches)) => {
            let url = required(sub_matches, "url")?;
            run_match_mode(&config, url)?;
        }
        Some(("fingerprint", sub_matches)) => {
            let url = required(sub_matches, "url")?;
            let body_path = sub_matches.get_one::<String>("body");
            let fetch = sub_matches.get_flag("fetch");
            let output = sub_matches.get_one::<String>("output");

            run_fingerprint_mode(&config, url, body_path, fetch, output).await?;
        }
        _ => {
            eprintln!("No subcommand provided. Use --help for usage information.");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn required<'a>(matches: &'a clap::ArgMatches, name: &str) -> Result<&'a String> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| SniffError::Parse(format!("missing --{}", name)))
}

fn build_registry(config: &Config) -> Result<Arc<SignatureRegistry>> {
    Ok(Arc::new(SignatureRegistry::from_seeds(&config.fingerprint.signatures)?))
}

async fn run_capture_mode(mut config: Config, interfaces: Option<Vec<String>>) -> Result<()> {
    if let Some(interfaces) = interfaces {
        config.capture.interfaces = interfaces;
    }

    let session_id = generate_session_id();
    let sink = CaptureSink::open(&config.sink.text_log, &config.sink.trace_file)?;
    let registry = build_registry(&config)?;
    let supervisor = CaptureSupervisor::new(config.capture.clone(), Arc::new(sink), registry);

    let interfaces = supervisor.resolve_interfaces()?;
    info!("Capture session {} on {} device(s)", session_id, interfaces.len());
    info!(
        "Writing text log to {} and trace to {}",
        config.sink.text_log, config.sink.trace_file
    );

    let shutdown = supervisor.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping capture workers");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    let reports = supervisor.run(interfaces).await;

    println!("\n=== CAPTURE SUMMARY ===");
    println!("Session ID: {}", session_id);
    println!("Finished: {}", format_timestamp(chrono::Utc::now()));
    for report in &reports {
        println!("\n--- {} ---", report.interface);
        if let Some(ref err) = report.error {
            println!("Failed: {}", err);
            continue;
        }
        let stats = &report.stats;
        println!("Frames read: {}", stats.received);
        println!("Accepted: {}", stats.accepted);
        println!("Out of scope: {}", stats.out_of_scope);
        println!("Malformed: {}", stats.malformed);
        println!("Written: {}", stats.written);
        println!("Lost: {}", stats.lost);
        println!("Identified scripts: {}", stats.identified);
    }

    if !reports.is_empty() && reports.iter().all(|r| r.error.is_some()) {
        error!("No capture worker could be started");
    }

    Ok(())
}

fn run_devices_mode() -> Result<()> {
    let devices = PacketSource::list_interfaces()?;

    println!("\n=== CAPTURE DEVICES ===");
    for device in &devices {
        println!("{}", device.name);
        if let Some(ref desc) = device.description {
            println!("  Description: {}", desc);
        }
        for addr in &device.addresses {
            println!("  Address: {}", addr);
        }
    }

    Ok(())
}

fn run_match_mode(config: &Config, url: &str) -> Result<()> {
    let registry = build_registry(config)?;
    let matches = registry.match_signature(url);

    println!("URL: {}", url);
    if matches.is_empty() {
        println!("No known signature matched");
    }
    for hit in &matches {
        println!("{} (Fingerprint: {})", hit.name, hit.fingerprint);
        if !hit.groups.is_empty() {
            println!("  Matched groups: {:?}", hit.groups);
        }
    }

    Ok(())
}

async fn run_fingerprint_mode(
    config: &Config,
    url: &str,
    body_path: Option<&String>,
    fetch: bool,
    output: Option<&String>,
) -> Result<()> {
    let engine = FingerprintEngine::new(
        Tokenizer::new(config.fingerprint.hex_run_threshold),
        build_registry(config)?,
    );

    let body = if let Some(path) = body_path {
        Some(std::fs::read_to_string(path)?)
    } else if fetch {
        info!("Fetching {}", url);
        Some(reqwest::get(url).await?.error_for_status()?.text().await?)
    } else {
        None
    };

    let result = engine.identify(url, body.as_deref());

    println!("\n=== SCRIPT FINGERPRINT ===");
    println!("URL: {}", result.identifier);
    println!("Extracted Tokens: {:?}", result.tokens);
    if let Some(ref content) = result.content_fingerprint {
        println!("Content Fingerprint: {}", content);
    }
    println!("Generated Fingerprint: {}", result.combined_fingerprint);

    println!("\n--- Known Signatures ---");
    if result.matches.is_empty() {
        println!("None");
    }
    for hit in &result.matches {
        println!("{} (Fingerprint: {})", hit.name, hit.fingerprint);
    }

    if let Some(path) = output {
        let json_output = serde_json::to_string_pretty(&result)?;
        std::fs::write(path, json_output)?;
        info!("Fingerprint result saved to: {}", path);
    }

    Ok(())
}
