use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use covidmap_etl::app::{App, BuildOptions};
use covidmap_etl::config::{ConfigLoader, ResolvedConfig, resolve_jobs};
use covidmap_etl::domain::ApiErrorResponse;
use covidmap_etl::error::EtlError;
use covidmap_etl::fetch::CovidActNowClient;
use covidmap_etl::output::{JsonOutput, LogSink, OutputMode, print_human_build, print_human_list};
use covidmap_etl::store::Store;

#[derive(Parser)]
#[command(name = "covidmap")]
#[command(about = "Download CovidActNow county timeseries and assemble GeoJSON files for every metric")]
#[command(version)]
struct Cli {
    /// Path to covidmap.json (defaults to ./covidmap.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Destination path for the generated .json.gz files
    #[arg(short, long, global = true)]
    out: Option<String>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Worker threads for projection (0 = one per core)
    #[arg(long, global = true)]
    jobs: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download (if stale) and assemble GeoJSON files for all metrics")]
    Build,
    #[command(about = "Print the artifact path for category.metric")]
    Resolve(ResolveArgs),
    #[command(about = "List published artifacts")]
    List,
}

#[derive(Args)]
struct ResolveArgs {
    slug: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<EtlError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EtlError) -> u8 {
    match error.root() {
        EtlError::ArtifactNotFound(_)
        | EtlError::InvalidMetric { .. }
        | EtlError::InvalidCategory(_)
        | EtlError::ConfigRead(_)
        | EtlError::ConfigParse(_) => 2,
        EtlError::Auth(_) | EtlError::Network(_) | EtlError::HttpStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let output_dir = cli
        .out
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| config.output_dir.clone());
    let store = Store::new(config.cache_dir.clone(), output_dir);

    match cli.command.unwrap_or(Commands::Build) {
        Commands::Build => run_build(cli.jobs, store, &config, output_mode),
        Commands::Resolve(args) => run_resolve(args, store, &config, output_mode),
        Commands::List => run_list(store, &config, output_mode),
    }
}

fn http_client(config: &ResolvedConfig) -> Result<CovidActNowClient, EtlError> {
    CovidActNowClient::new(
        &config.api_base_url,
        ConfigLoader::api_key_from_env(),
        config.fetch_timeout,
    )
}

fn run_build(
    jobs: Option<usize>,
    store: Store,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let app = App::new(store, http_client(config)?);
    let options = BuildOptions {
        geometry_path: config.geometry_path.clone(),
        jobs: jobs.map(resolve_jobs).unwrap_or(config.jobs),
    };

    match output_mode {
        OutputMode::Json => {
            let report = app.build(&options, &JsonOutput)?;
            JsonOutput::print_build(&report).into_diagnostic()?;
        }
        OutputMode::Human => {
            let report = app.build(&options, &LogSink::new())?;
            print_human_build(&report);
        }
    }
    Ok(())
}

fn run_resolve(
    args: ResolveArgs,
    store: Store,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let app = App::new(store, http_client(config)?);
    match (app.resolve(&args.slug), output_mode) {
        (Ok(result), OutputMode::Json) => JsonOutput::print_resolve(&result).into_diagnostic(),
        (Ok(result), OutputMode::Human) => {
            println!("{}", result.path);
            Ok(())
        }
        (Err(err), OutputMode::Json)
            if matches!(
                err,
                EtlError::ArtifactNotFound(_)
                    | EtlError::InvalidMetric { .. }
                    | EtlError::InvalidCategory(_)
            ) =>
        {
            let body = serde_json::to_string_pretty(&ApiErrorResponse::invalid_metric(&args.slug))
                .into_diagnostic()?;
            println!("{body}");
            Err(err.into())
        }
        (Err(err), _) => Err(err.into()),
    }
}

fn run_list(store: Store, config: &ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let app = App::new(store, http_client(config)?);
    let result = app.list()?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_list(&result).into_diagnostic(),
        OutputMode::Human => {
            print_human_list(&result);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn jobs_works_without_subcommand() {
        let cli = Cli::try_parse_from(["covidmap", "--jobs", "2", "-o", "out"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.jobs, Some(2));
        assert_eq!(cli.out.as_deref(), Some("out"));
    }

    #[test]
    fn jobs_works_after_build() {
        let cli = Cli::try_parse_from(["covidmap", "build", "--jobs", "0", "--json"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Build)));
        assert_eq!(cli.jobs, Some(0));
        assert!(cli.json);
    }

    #[test]
    fn resolve_takes_a_slug() {
        let cli = Cli::try_parse_from(["covidmap", "resolve", "actuals.cases"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Resolve(args)) if args.slug == "actuals.cases"));
    }

    #[test]
    fn exit_codes() {
        let missing = || EtlError::ArtifactNotFound("actuals.cases".to_string());
        assert_eq!(map_exit_code(&missing()), 2);
        assert_eq!(
            map_exit_code(&EtlError::InvalidMetric {
                category: "actuals".to_string(),
                metric: "nope".to_string(),
            }),
            2
        );
        assert_eq!(map_exit_code(&EtlError::InvalidCategory("vaccines".to_string())), 2);
        assert_eq!(map_exit_code(&EtlError::ConfigRead(PathBuf::from("covidmap.json"))), 2);
        assert_eq!(map_exit_code(&EtlError::ConfigParse("bad".to_string())), 2);

        assert_eq!(map_exit_code(&EtlError::Auth("no key".to_string())), 3);
        assert_eq!(map_exit_code(&EtlError::Network("reset".to_string())), 3);
        assert_eq!(
            map_exit_code(&EtlError::HttpStatus {
                status: 500,
                message: "boom".to_string(),
            }),
            3
        );

        assert_eq!(map_exit_code(&EtlError::Parse("eof".to_string())), 1);
        assert_eq!(map_exit_code(&EtlError::InvalidFeature("feature 0".to_string())), 1);

        let staged = EtlError::Network("reset".to_string())
            .in_stage("fetch", "timeseries payload")
            .in_stage("build", "run");
        assert_eq!(map_exit_code(&staged), 3);
        assert_eq!(map_exit_code(&missing().in_stage("resolve", "actuals.cases")), 2);
    }
}
