use clap::{Parser, Subcommand};
use resilient_translator::{
    BatchRequest, Credential, GeminiTransport, GenerativeTransport, JsonFileStore, KeyValueStore,
    ScriptedReply, ScriptedTransport, TranslationLibConfig, TranslationService,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resilient-translator", version, about = "Batch subtitle translation with key/model failover")]
struct Cli {
    /// Configuration file (default: auto-discovered)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Use the offline echo transport instead of the real API
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Translate lines read from stdin as one batch, print the JSON response
    Translate {
        /// Source language code (ja, ko, en, ...)
        #[arg(long, short = 's')]
        lang: String,
        /// Candidate models, most preferred first (default: from settings)
        #[arg(long = "model", short = 'm')]
        models: Vec<String>,
        /// File whose content replaces the prompt; must contain {json_input_text}
        #[arg(long)]
        prompt_file: Option<PathBuf>,
    },
    /// Probe every stored API key against the reference model
    Diagnose,
    /// Show the audit log, most recent first
    Logs {
        #[arg(long)]
        clear: bool,
    },
    /// Manage the API key pool
    Keys {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Write an example configuration file
    InitConfig {
        #[arg(default_value = "translation-config.toml")]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    List,
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// API key; read from RESILIENT_TRANSLATOR_KEY when omitted
        #[arg(long)]
        key: Option<String>,
    },
    Remove {
        #[arg(long)]
        id: String,
    },
}

async fn open_store(dir: &Path, name: &str) -> resilient_translator::Result<Arc<dyn KeyValueStore>> {
    let store = JsonFileStore::open(dir.join(name)).await?;
    Ok(Arc::new(store))
}

/// session 里只有可重建的状态，文件损坏时从空白开始
async fn open_session_store(dir: &Path, name: &str) -> resilient_translator::Result<Arc<dyn KeyValueStore>> {
    let store = JsonFileStore::open_or_reset(dir.join(name)).await?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let lib_config = match &cli.config {
        Some(path) => TranslationLibConfig::from_file(path)?,
        None => TranslationLibConfig::load_from_default_locations(),
    };
    let config = lib_config.translation;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if let Command::InitConfig { path } = &cli.command {
        TranslationLibConfig::generate_example_config(path)?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let data_dir = PathBuf::from(&config.data_dir);
    let local = open_store(&data_dir, "local.json").await?;
    let session = open_session_store(&data_dir, "session.json").await?;
    let transport: Arc<dyn GenerativeTransport> = if cli.mock {
        Arc::new(ScriptedTransport::new(ScriptedReply::Echo))
    } else {
        Arc::new(GeminiTransport::new(&config)?)
    };
    let service = TranslationService::new(config, local, session, transport).await;

    match cli.command {
        Command::Translate { lang, models, prompt_file } => {
            let prompt_override = match prompt_file {
                Some(path) => Some(tokio::fs::read_to_string(path).await?),
                None => None,
            };

            let mut texts = Vec::new();
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                if !line.trim().is_empty() {
                    texts.push(line);
                }
            }

            let request = BatchRequest {
                texts,
                source_language: lang,
                models_by_preference: models,
                prompt_override,
            };
            let response = service.handle(&request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Diagnose => {
            let results = service.diagnose_credentials().await;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Logs { clear } => {
            if clear {
                service.clear_logs();
                println!("audit log cleared");
            } else {
                println!("{}", serde_json::to_string_pretty(&service.logs())?);
            }
        }
        Command::Keys { action } => match action {
            KeyAction::List => {
                for credential in service.credentials().await? {
                    println!("{}\t{}", credential.id, credential.display_name);
                }
            }
            KeyAction::Add { id, name, key } => {
                let secret = match key {
                    Some(key) => key,
                    None => std::env::var("RESILIENT_TRANSLATOR_KEY")
                        .map_err(|_| "pass --key or set RESILIENT_TRANSLATOR_KEY")?,
                };
                service.add_credential(Credential::new(id.clone(), secret, name)).await?;
                println!("saved key {}", id);
            }
            KeyAction::Remove { id } => {
                if service.remove_credential(&id).await? {
                    println!("removed key {}", id);
                } else {
                    println!("no key with id {}", id);
                }
            }
        },
        Command::InitConfig { .. } => {}
    }

    service.flush().await;

    Ok(())
}
