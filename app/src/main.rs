use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use host::{CpuInfo, InMemoryHost};
use memory::MemInfoSource;
use serde::Deserialize;
use serde_json::{json, Value};
use storage::JsonFileStore;
use tabmon::app::{self, Inbound};
use tabmon::{Background, Config, HostEvent};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const INBOX_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "tabmond")]
struct Args {
    /// JSON document holding persisted stats and settings.
    #[arg(long, default_value = "tabmon-state.json")]
    state_file: PathBuf,
    #[arg(long, default_value_t = 10)]
    interval_secs: u64,
    #[arg(long, default_value_t = 24)]
    staleness_hours: i64,
    #[arg(long, default_value_t = 100)]
    download_limit: usize,
    /// Fixed seed for simulated metrics.
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            monitor_interval_ms: self.interval_secs.saturating_mul(1000),
            staleness_hours: self.staleness_hours,
            download_limit: self.download_limit,
            simulation_seed: self.seed,
            ..Config::default()
        }
    }
}

/// One input line: either a host event or a request with an optional
/// correlation id echoed back in the reply.
#[derive(Debug, Deserialize)]
struct Line {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    event: Option<HostEvent>,
    #[serde(default)]
    request: Option<Value>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn local_host() -> InMemoryHost {
    let host = InMemoryHost::new().with_memory_source(MemInfoSource::new());
    let processors = std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1);
    host.set_cpu_info(Some(CpuInfo {
        num_of_processors: processors,
        model_name: String::new(),
        arch_name: std::env::consts::ARCH.to_string(),
    }));
    host
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    init_logging();

    let store = match JsonFileStore::open(&args.state_file).await {
        Ok(store) => store,
        Err(err) => {
            error!(event = "state_open_failed", path = %args.state_file.display(), error = %err);
            return;
        }
    };
    info!(event = "tabmond_start", path = %store.path().display());
    let host = Rc::new(local_host());
    let background = Rc::new(Background::new(host.clone(), Rc::new(store), args.config()));

    LocalSet::new().run_until(serve(host, background)).await;
}

async fn serve(host: Rc<InMemoryHost>, background: Rc<Background>) {
    let (inbox, rx) = mpsc::channel(INBOX_CAPACITY);
    let (out, mut outgoing) = mpsc::unbounded_channel::<String>();
    let server = tokio::task::spawn_local(app::run(background, rx));
    let writer = tokio::task::spawn_local(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = outgoing.recv().await {
            let written = async {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await
            };
            if let Err(err) = written.await {
                warn!(event = "stdout_write_failed", error = %err);
                break;
            }
        }
    });

    if inbox.send(Inbound::Event(HostEvent::Startup)).await.is_err() {
        return;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let raw = match lines.next_line().await {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(err) => {
                warn!(event = "stdin_read_failed", error = %err);
                break;
            }
        };
        if raw.trim().is_empty() {
            continue;
        }

        let line: Line = match serde_json::from_str(&raw) {
            Ok(line) => line,
            Err(err) => {
                warn!(event = "invalid_line", error = %err);
                continue;
            }
        };

        if let Some(event) = line.event {
            mirror(&host, &event);
            if inbox.send(Inbound::Event(event)).await.is_err() {
                break;
            }
        }
        if let Some(message) = line.request {
            let (reply, response) = oneshot::channel();
            if inbox.send(Inbound::Request { message, reply }).await.is_err() {
                break;
            }
            let out = out.clone();
            let id = line.id;
            tokio::task::spawn_local(async move {
                let Ok(response) = response.await else {
                    debug!(event = "request_abandoned");
                    return;
                };
                let _ = out.send(json!({"id": id, "response": response}).to_string());
            });
        }
    }

    drop(inbox);
    if let Err(err) = server.await {
        error!(event = "background_task_failed", error = %err);
    }
    drop(out);
    let _ = writer.await;
}

/// Keeps the local host view in step with the events the ingestor sees.
fn mirror(host: &InMemoryHost, event: &HostEvent) {
    match event {
        HostEvent::Tab(event) => host.apply_tab_event(event),
        HostEvent::Download(event) => host.apply_download_event(event),
        HostEvent::Installed { .. } | HostEvent::Startup => {}
    }
}
