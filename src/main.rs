use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use draftflow_config::Settings;
use draftflow_content::{ContentStore, FsContentStore};
use draftflow_engine::{FlowManager, FlowStatus, ManagerConfig};
use draftflow_orchestrator::{StageSequence, document_pipeline};
use draftflow_server::AppState;
use draftflow_stage::{FlowContext, HttpGenerator};

/// Draftflow - staged content generation with observable flows
#[derive(Parser)]
#[command(name = "draftflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to a JSON settings file
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Path to the data directory (default: ~/.draftflow)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Start the HTTP server
  Serve {
    /// Address to listen on (overrides server.bind)
    #[arg(long)]
    bind: Option<String>,

    /// Content store directory (overrides content.dir)
    #[arg(long)]
    content_dir: Option<PathBuf>,
  },

  /// Run a single flow inline and print its final document
  Run {
    /// Path to the flow context file (JSON)
    context_file: PathBuf,

    /// Content store directory (overrides content.dir)
    #[arg(long)]
    content_dir: Option<PathBuf>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".draftflow"),
  };

  let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

  match cli.command {
    Some(Commands::Serve { bind, content_dir }) => {
      if let Some(bind) = bind {
        settings.server.bind = bind;
      }
      if let Some(dir) = content_dir {
        settings.content.dir = Some(dir);
      }
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(serve(settings, data_dir))?;
    }
    Some(Commands::Run {
      context_file,
      content_dir,
    }) => {
      if let Some(dir) = content_dir {
        settings.content.dir = Some(dir);
      }
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_flow(settings, data_dir, context_file))?;
    }
    None => {
      println!("draftflow - use --help to see available commands");
    }
  }

  Ok(())
}

fn content_store(settings: &Settings, data_dir: &Path) -> Arc<dyn ContentStore> {
  let dir = settings.content.resolve_dir(data_dir);
  info!(dir = %dir.display(), "using content store");
  Arc::new(FsContentStore::new(dir))
}

fn pipeline(settings: &Settings, store: Arc<dyn ContentStore>) -> Result<StageSequence> {
  let generator = &settings.generator;
  let api_key = generator.api_key();
  if api_key.is_none() {
    warn!(env = %generator.api_key_env, "no API key set, generation requests are unauthenticated");
  }

  let generator = HttpGenerator::new(
    generator.endpoint.clone(),
    generator.model.clone(),
    api_key,
    generator.timeout(),
  )
  .context("failed to create generator")?;

  Ok(document_pipeline(Arc::new(generator), store))
}

fn manager_config(settings: &Settings) -> ManagerConfig {
  ManagerConfig {
    poll_interval: settings.flows.poll_interval(),
    subscription_ceiling: settings.flows.subscription_ceiling(),
    ..ManagerConfig::default()
  }
}

async fn serve(settings: Settings, data_dir: PathBuf) -> Result<()> {
  let store = content_store(&settings, &data_dir);
  let sequence = pipeline(&settings, store.clone())?;
  let flows = Arc::new(FlowManager::with_config(sequence, manager_config(&settings)));

  let cancel = CancellationToken::new();
  let sweep = flows.spawn_cleanup_sweep(
    settings.flows.cleanup_interval(),
    settings.flows.max_age(),
    cancel.clone(),
  );

  let listener = TcpListener::bind(&settings.server.bind)
    .await
    .with_context(|| format!("failed to bind {}", settings.server.bind))?;

  tokio::spawn({
    let cancel = cancel.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
      }
      cancel.cancel();
    }
  });

  let state = AppState::new(flows, store);
  draftflow_server::serve(listener, state, cancel.clone())
    .await
    .context("server failed")?;

  cancel.cancel();
  sweep.await.context("cleanup sweep panicked")?;
  Ok(())
}

async fn run_flow(settings: Settings, data_dir: PathBuf, context_file: PathBuf) -> Result<()> {
  let content = tokio::fs::read_to_string(&context_file)
    .await
    .with_context(|| format!("failed to read context file: {}", context_file.display()))?;

  let context: FlowContext = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse context file: {}", context_file.display()))?;
  let context = context.normalized();

  let store = content_store(&settings, &data_dir);
  let sequence = pipeline(&settings, store)?;
  let flows = FlowManager::with_config(sequence, manager_config(&settings));

  let mut driver = flows.start_flow(context, None)?;
  eprintln!("Started flow: {}", driver.id());

  while let Some(snapshot) = driver.next().await {
    let stage = snapshot.current_stage.as_deref().unwrap_or("-");
    eprintln!("[{:>5.1}%] {} ({})", snapshot.progress, stage, snapshot.status);
  }

  let id = driver.id().to_string();
  let state = flows
    .get_flow_state(&id)
    .with_context(|| format!("flow {id} disappeared"))?;

  if state.status != FlowStatus::Completed {
    bail!(
      "flow {} {}: {}",
      id,
      state.status,
      state.error.as_deref().unwrap_or("no error recorded")
    );
  }

  let document = flows
    .get_final_document(&id)
    .with_context(|| format!("flow {id} completed without a final document"))?;
  println!("{document}");

  Ok(())
}
