use futures::StreamExt;
use notyou::logger::{self, LogLevel, LoggerConfig};
use notyou::{
    Category, ControllerHandle, DisplayStatus, FormSelection, ImageGenerator, KioskConfig,
    RequestController, StableDiffusionClient, UNSET_MARKER,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_OUTPUT: &str = "current_portrait.png";

/// Headless driver: reads form changes from stdin and writes the portrait on
/// screen to `NOTYOU_OUTPUT` whenever it changes.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let mut logger_config = if env::var("NOTYOU_KIOSK").is_ok() {
        LoggerConfig::kiosk()
    } else {
        LoggerConfig::development()
    };
    if let Ok(level) = env::var("NOTYOU_LOG_LEVEL") {
        logger_config = logger_config.with_level(level.parse::<LogLevel>()?);
    }
    logger::init_with_config(logger_config)?;
    logger::log_startup_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    if !dotenv_loaded {
        log::warn!("No .env file found, using system environment variables");
    }

    let config = match KioskConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Refusing to start: {}", e);
            return Err(e.into());
        }
    };
    logger::log_config_info(&config);

    let client = Arc::new(StableDiffusionClient::new(&config)?);
    match client.health_check().await {
        Ok(true) => log::info!("Stable Diffusion API reachable at {}", config.api.base_url),
        Ok(false) => log::warn!("Stable Diffusion API not answering yet, continuing anyway"),
        Err(e) => {
            log::error!("Stable Diffusion API refused our credentials: {}", e);
            return Err(e.into());
        }
    }

    let handle = RequestController::spawn(client, &config)?;
    let output = PathBuf::from(env::var("NOTYOU_OUTPUT").unwrap_or_else(|_| DEFAULT_OUTPUT.into()));
    let renderer = tokio::spawn(render(handle.clone(), output));

    read_commands(&handle).await?;

    handle.shutdown().await;
    renderer.abort();
    Ok(())
}

/// Stand-in for the kiosk screen.
async fn render(handle: ControllerHandle, output: PathBuf) {
    let mut changes = handle.changes();
    let mut written = None;

    while let Some(state) = changes.next().await {
        log::info!(
            "Display: {:?}{} | {}",
            state.status,
            if state.suspended { " (suspended)" } else { "" },
            state.prompt_text
        );
        if let Some(error) = &state.last_error {
            log::warn!("Last error: {} ({})", error.detail, error.kind);
        }

        if state.status != DisplayStatus::Ready || written == state.request_id {
            continue;
        }
        if let Some(bytes) = state.image.bytes() {
            match tokio::fs::write(&output, bytes).await {
                Ok(()) => {
                    written = state.request_id;
                    log::info!("Portrait written to {}", output.display());
                }
                Err(e) => log::error!("Cannot write {}: {}", output.display(), e),
            }
        }
    }
}

/// One command per line:
///   `age=Senior; gender=Female` updates fields (`field=?` unsets one)
///   `reset` unsets everything, `remix` regenerates, `resume` clears a fault,
///   `quit` exits.
async fn read_commands(handle: &ControllerHandle) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut selection = FormSelection::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => break,
            "remix" => handle.regenerate()?,
            "resume" => handle.clear_fault()?,
            "reset" => {
                selection = FormSelection::new();
                handle.submit(selection.clone())?;
            }
            _ => match apply_fields(&mut selection, line) {
                Ok(()) => handle.submit(selection.clone())?,
                Err(e) => log::warn!("{}", e),
            },
        }
    }
    Ok(())
}

fn apply_fields(selection: &mut FormSelection, line: &str) -> notyou::Result<()> {
    let mut updated = selection.clone();
    for field in line.split(';').filter(|f| !f.trim().is_empty()) {
        let (key, value) = field.split_once('=').ok_or_else(|| {
            notyou::KioskError::ConfigError(format!("Expected field=value, got '{}'", field.trim()))
        })?;
        let category: Category = key.parse()?;
        if value.trim() == UNSET_MARKER {
            updated.clear(category);
        } else {
            updated.set(category, value);
        }
    }
    *selection = updated;
    Ok(())
}
