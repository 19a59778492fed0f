use clap::{Arg, Command};
use edge_decisioning::decisioning::DecisioningService;
use edge_decisioning::delivery::DeliveryRequest;
use edge_decisioning::errors::LogReporter;
use edge_decisioning::loader::parse_and_validate;
use edge_decisioning::remote::NoopDeliveryCaller;
use edge_decisioning::ClientConfig;
use log::LevelFilter;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("edge-decisioning")
        .version(env!("CARGO_PKG_VERSION"))
        .about("On-device decisioning engine for compiled rule artifacts")
        .arg(
            Arg::new("client")
                .short('c')
                .long("client")
                .value_name("CODE")
                .help("Client code used for allocation hashing")
                .default_value("local"),
        )
        .arg(
            Arg::new("artifact")
                .short('a')
                .long("artifact")
                .value_name("FILE")
                .help("Rule artifact JSON file to load")
                .required(true)
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("validate")
                .long("validate")
                .help("Validate the artifact and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("request")
                .short('r')
                .long("request")
                .value_name("FILE")
                .help("Delivery request JSON file to evaluate against the artifact")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let artifact_path = matches.get_one::<String>("artifact").unwrap();
    let artifact = match load_artifact(artifact_path) {
        Ok(artifact) => artifact,
        Err(e) => {
            eprintln!("Error loading artifact: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("validate") {
        println!(
            "Artifact is valid: version {}, {} rules, global mbox '{}'",
            artifact.version,
            artifact.rules.len(),
            artifact.global_mbox
        );
        return;
    }

    let Some(request_path) = matches.get_one::<String>("request") else {
        eprintln!("Nothing to do: pass --request FILE or --validate");
        process::exit(1);
    };

    let request = match load_request(request_path) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Error loading request: {e}");
            process::exit(1);
        }
    };

    let client = matches.get_one::<String>("client").unwrap();
    let service = DecisioningService::new(
        Arc::new(ClientConfig::new(client.clone())),
        Arc::new(NoopDeliveryCaller),
        Arc::new(LogReporter),
        None,
    );
    service.loader().seed(artifact);

    let result = service.execute_request(request).await;
    log::info!("evaluation finished with status {}: {}", result.status, result.message);
    if !result.remote_mboxes.is_empty() || !result.remote_views.is_empty() {
        log::warn!(
            "not fully decidable offline; remote mboxes: {:?}, remote views: {:?}",
            result.remote_mboxes,
            result.remote_views
        );
    }

    match serde_json::to_string_pretty(&result.response) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error serializing response: {e}");
            process::exit(1);
        }
    }
}

fn load_artifact(path: &str) -> anyhow::Result<edge_decisioning::RuleArtifact> {
    let body = std::fs::read_to_string(path)?;
    Ok(parse_and_validate(&body)?)
}

fn load_request(path: &str) -> anyhow::Result<DeliveryRequest> {
    let body = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&body)?)
}
