//! OpenAPI Contract CLI
//!
//! Validate recorded HTTP exchanges against OpenAPI documents.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use openapi_contract::{
    Config, Engine, GithubSourceConfig, HttpRequest, HttpResponse, ValidationResult,
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "openapi-contract")]
#[command(about = "Validate HTTP exchanges against OpenAPI contracts")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a recorded request/response exchange
    Validate {
        /// Exchange file: {"request": {...}, "response": {...}}
        exchange: PathBuf,

        #[command(flatten)]
        sources: SourceArgs,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// List every operation declared by the loaded documents
    Routes {
        #[command(flatten)]
        sources: SourceArgs,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Local directory searched recursively for .yaml/.yml documents
    #[arg(long = "schemas", value_name = "DIR")]
    schemas: Vec<PathBuf>,

    /// GitHub tree URL (https://github.com/{owner}/{repo}/tree/{ref}/{path})
    #[arg(long = "github", value_name = "URL")]
    github: Vec<String>,

    /// Environment variable holding the token for --github sources
    #[arg(long, value_name = "NAME", requires = "github")]
    github_token_env: Option<String>,

    /// YAML configuration file; --schemas and --github are added to it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Deserialize)]
struct Exchange {
    request: HttpRequest,
    response: HttpResponse,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Validate {
            exchange,
            sources,
            json,
        } => run_validate(&exchange, &sources, json),
        Commands::Routes { sources } => run_routes(&sources),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn build_config(args: &SourceArgs) -> Result<Config, (String, u8)> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).map_err(|e| (e.to_string(), e.exit_code() as u8))?,
        None => Config::default(),
    };

    config.local_paths.extend(args.schemas.iter().cloned());
    config.github_sources.extend(args.github.iter().map(|url| {
        let entry = GithubSourceConfig::new(url.as_str());
        match &args.github_token_env {
            Some(name) => entry.token_env(name.as_str()),
            None => entry,
        }
    }));

    if config.local_paths.is_empty() && config.github_sources.is_empty() {
        return Err((
            "no schema locations given; use --schemas, --github or --config".to_string(),
            2,
        ));
    }
    Ok(config)
}

fn build_engine(args: &SourceArgs) -> Result<Engine, (String, u8)> {
    let config = build_config(args)?;
    let source = config
        .schema_source()
        .map_err(|e| (e.to_string(), e.exit_code() as u8))?;
    Ok(Engine::new(source))
}

fn load_exchange(path: &Path) -> Result<Exchange, (String, u8)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| (format!("cannot read {}: {}", path.display(), e), 3))?;
    serde_json::from_str(&content)
        .map_err(|e| (format!("invalid exchange file {}: {}", path.display(), e), 2))
}

fn run_validate(exchange: &Path, sources: &SourceArgs, json_output: bool) -> Result<(), u8> {
    let verdicts = validate_exchange(exchange, sources).map_err(|(msg, code)| {
        report_error(json_output, &msg);
        code
    })?;
    let (request, response) = verdicts;
    let valid = request.is_valid() && response.is_valid();

    if json_output {
        let output = serde_json::json!({
            "valid": valid,
            "request": request,
            "response": response,
        });
        println!("{}", output);
    } else if valid {
        println!("Valid");
    } else {
        print_failure("request", &request);
        print_failure("response", &response);
    }

    if valid {
        Ok(())
    } else {
        Err(1)
    }
}

fn validate_exchange(
    path: &Path,
    sources: &SourceArgs,
) -> Result<(ValidationResult, ValidationResult), (String, u8)> {
    let exchange = load_exchange(path)?;
    let mut engine = build_engine(sources)?;
    let fail = |e: openapi_contract::EngineError| (e.to_string(), e.exit_code() as u8);

    let request = engine.validate_request(&exchange.request).map_err(fail)?;
    let response = engine
        .validate_response(
            &exchange.request,
            &exchange.response,
            request.operation_address(),
            request.schema_identifier(),
        )
        .map_err(fail)?;
    Ok((request, response))
}

fn print_failure(kind: &str, result: &ValidationResult) {
    if result.is_valid() {
        return;
    }
    eprintln!("OpenAPI {} validation failed:", kind);
    if let Some(message) = result.error_message() {
        eprintln!("  {}", message);
    }
    eprintln!("  Schema: {}", result.schema_identifier().unwrap_or("unknown"));
}

fn run_routes(sources: &SourceArgs) -> Result<(), u8> {
    let mut engine = build_engine(sources).map_err(|(msg, code)| {
        report_error(false, &msg);
        code
    })?;
    let catalog = engine.catalog().map_err(|e| {
        report_error(false, &e.to_string());
        e.exit_code() as u8
    })?;

    for (identifier, operation) in catalog.routes() {
        println!(
            "{:<7} {}  ({})",
            operation.method().to_uppercase(),
            operation.path(),
            identifier
        );
    }
    Ok(())
}

fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({"valid": false, "error": msg}));
    } else {
        eprintln!("Error: {}", msg);
    }
}
