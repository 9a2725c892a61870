use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vista::{
    ApiServer, ApiState, Config, DescriptionClient, GeminiBackend, ImageFetcher, Phase, Session,
    SessionLimits,
};

/// Vista - detailed AI descriptions of images
#[derive(Parser)]
#[command(name = "vista", version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "VISTA_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server (default)
    Serve {
        /// Port to listen on
        #[arg(long, env = "VISTA_PORT")]
        port: Option<u16>,

        /// Directory with a web front end to serve
        #[arg(long, env = "VISTA_STATIC_DIR")]
        static_dir: Option<PathBuf>,
    },
    /// Describe a single image and print the result
    Describe(DescribeArgs),
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct DescribeArgs {
    /// Local PNG, JPEG or WEBP file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Image URL
    #[arg(short, long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,vista=info",
        1 => "info,vista=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // Missing credential stops everything here
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    let backend = GeminiBackend::new(config.api_key, &config.model)?;
    tracing::debug!(endpoint = backend.endpoint(), "generation backend ready");

    let client = Arc::new(DescriptionClient::new(
        Arc::new(backend),
        config.retry,
        config.model.prompt.clone(),
    ));
    let fetcher = ImageFetcher::new(&config.fetch)?;

    let command = cli.command.unwrap_or(Command::Serve {
        port: None,
        static_dir: None,
    });

    match command {
        Command::Describe(args) => describe(client, fetcher, config.timing, args).await,
        Command::Serve { port, static_dir } => {
            let state = Arc::new(ApiState::new(
                client,
                fetcher,
                config.timing,
                SessionLimits {
                    ttl: config.server.session_ttl,
                    max_sessions: config.server.max_sessions,
                },
                config.model.name,
                config.fetch.max_bytes,
            ));
            let server = ApiServer::new(
                state,
                port.unwrap_or(config.server.port),
                static_dir.or(config.server.static_dir),
            );
            server.run().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Describe one image, rendering progress on stderr
async fn describe(
    client: Arc<DescriptionClient>,
    fetcher: ImageFetcher,
    timing: vista::SessionTiming,
    args: DescribeArgs,
) -> anyhow::Result<ExitCode> {
    let session = Session::new(client, timing);

    let loaded = if let Some(path) = args.file {
        vista::load_from_file(&path).await
    } else if let Some(url) = args.url {
        fetcher.load_from_url(&url).await
    } else {
        anyhow::bail!("either --file or --url is required");
    };

    match loaded {
        Ok(source) => {
            session.load_image(source).await?;
        }
        Err(e) => {
            let snapshot = session.record_load_failure(&e).await?;
            eprintln!("{}", snapshot.error.unwrap_or_default());
            return Ok(ExitCode::FAILURE);
        }
    }

    let mut updates = session.subscribe();
    session.generate().await?;

    let mut stderr = std::io::stderr();
    loop {
        let snapshot = updates.borrow_and_update().clone();
        if snapshot.busy {
            write!(stderr, "\rAnalyzing image... {:>3}%", snapshot.progress)?;
            stderr.flush()?;
        } else {
            writeln!(stderr)?;
            return Ok(match snapshot.phase {
                Phase::Done => {
                    println!("{}", snapshot.result.unwrap_or_default());
                    ExitCode::SUCCESS
                }
                _ => {
                    eprintln!("{}", snapshot.error.unwrap_or_default());
                    ExitCode::FAILURE
                }
            });
        }

        if updates.changed().await.is_err() {
            return Ok(ExitCode::FAILURE);
        }
    }
}
