use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast;

use anonymizer::config::{DEFAULT_ENDPOINT, DEFAULT_STORE_PATH, Settings};
use anonymizer::core::session::QUOTA_WARNING;
use anonymizer::{
    AnnotationPipeline, FileBlob, ImageId, ItemOutcome, ProgressTracker, SessionError, SessionEvent,
    SessionStore, SnapshotStore, Subject,
};

#[derive(Parser)]
#[command(name = "anonymizer")]
#[command(about = "Stage images, have faces and other subjects detected, and keep the set between runs")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Detection endpoint the images are POSTed to
    #[arg(long, env = "ANONYMIZER_ENDPOINT", default_value = DEFAULT_ENDPOINT, global = true)]
    endpoint: String,

    /// Session database file
    #[arg(long, env = "ANONYMIZER_STORE", default_value = DEFAULT_STORE_PATH, global = true)]
    store: PathBuf,

    /// Maximum size of the session database in bytes
    #[arg(long, env = "ANONYMIZER_QUOTA_BYTES", global = true)]
    quota_bytes: Option<u64>,

    /// Per-request timeout in seconds (default: none)
    #[arg(long, env = "ANONYMIZER_TIMEOUT_SECS", global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stage image files (up to the session capacity)
    Add {
        #[arg(value_name = "IMAGE", required = true)]
        files: Vec<PathBuf>,
    },
    /// List staged images
    List,
    /// Remove the image at POSITION (1-based)
    Remove { position: usize },
    /// Remove every staged image
    Clear,
    /// Run detection on all staged images and draw the results
    Preview {
        /// What to detect: faces, eyes or body
        #[arg(short, long, default_value = "faces")]
        subject: Subject,
    },
    /// Write the image at POSITION (annotated if available) to a file
    Save {
        position: usize,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Check that the detection service is reachable
    Health,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            endpoint: self.endpoint.clone(),
            store_path: self.store.clone(),
            quota_bytes: self.quota_bytes,
            request_timeout: self.timeout_secs.map(Duration::from_secs),
            ..Settings::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    anonymizer::logging::init_logging(args.verbose);
    let settings = args.settings();

    if let Command::Health = args.command {
        return health(&settings).await;
    }

    let store = settings.open_session().await;
    let mut events = store.subscribe();

    match args.command {
        Command::Add { files } => {
            let mut blobs = Vec::new();
            for path in &files {
                match FileBlob::read(path).await {
                    Ok(blob) => blobs.push(blob),
                    Err(e) => tracing::warn!(error = %format!("{:#}", e), "skipping unreadable file"),
                }
            }
            let offered = blobs.len();
            let added = store.add_files(blobs).await;
            println!("Staged {} image(s), {} of {} slots used.", added, store.len().await, store.capacity());
            if added < offered {
                println!("{} image(s) not staged: the session is full.", offered - added);
            }
        }
        Command::List => list(&store).await?,
        Command::Remove { position } => match to_index(position) {
            Some(index) => match store.remove_at(index).await {
                Ok(removed) => println!("Removed {}.", removed.name),
                Err(SessionError::OutOfRange { len, .. }) => {
                    eprintln!("No image at position {} ({} staged).", position, len)
                }
                Err(e) => eprintln!("{}", e),
            },
            None => eprintln!("Positions start at 1."),
        },
        Command::Clear => {
            let count = store.len().await;
            store.clear_all().await;
            println!("Removed {} image(s).", count);
        }
        Command::Preview { subject } => preview(&store, &settings, subject).await?,
        Command::Save { position, output } => {
            let image = match to_index(position) {
                Some(index) => store.get(index).await,
                None => None,
            };
            let Some(image) = image else {
                anyhow::bail!("No image at position {}", position);
            };
            let bytes = image.display_data().decode()?;
            tokio::fs::write(&output, bytes).await?;
            println!(
                "Wrote {} {} to {}",
                if image.annotation.is_some() { "annotated" } else { "original" },
                image.name,
                output.display()
            );
        }
        // Answered before the session was opened.
        Command::Health => {}
    }

    report_quota_warning(&mut events);
    Ok(())
}

async fn health(settings: &Settings) -> anyhow::Result<()> {
    let client = settings.detection_client()?;
    let status = client.health().await?;
    println!("{}: {}", client.endpoint(), status.trim());
    Ok(())
}

fn to_index(position: usize) -> Option<usize> {
    position.checked_sub(1)
}

fn report_quota_warning(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        if event == SessionEvent::QuotaWarning {
            eprintln!("Warning: {}", QUOTA_WARNING);
        }
    }
}

async fn list<S: SnapshotStore>(store: &SessionStore<S>) -> anyhow::Result<()> {
    let images = store.images().await;
    if images.is_empty() {
        println!("No images staged.");
        return Ok(());
    }
    for (index, image) in images.iter().enumerate() {
        let state = match image.annotations() {
            Some(boxes) => format!("{} detection(s)", boxes.len()),
            None => "not annotated".to_string(),
        };
        println!(
            "{:>2}. {} ({}, added {}) - {}",
            index + 1,
            image.name,
            image.mime_type,
            image.added_at.format(&Rfc3339)?,
            state
        );
    }
    println!("{} of {} slots used.", images.len(), store.capacity());
    Ok(())
}

async fn preview<S: SnapshotStore>(
    store: &SessionStore<S>,
    settings: &Settings,
    subject: Subject,
) -> anyhow::Result<()> {
    let images = store.images().await;
    if images.is_empty() {
        println!("Add images first.");
        return Ok(());
    }
    let names: HashMap<ImageId, String> = images.iter().map(|i| (i.id, i.name.clone())).collect();

    let client = settings.detection_client()?;
    let tracker = ProgressTracker::new();
    let pipeline = AnnotationPipeline::new(store, &client, &tracker);

    let batch = pipeline.run_batch(subject);
    tokio::pin!(batch);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let report = loop {
        tokio::select! {
            result = &mut batch => break result?,
            _ = ticker.tick() => draw_progress(&tracker, &names),
        }
    };
    eprint!("\r{:60}\r", "");

    for (index, item) in report.items.iter().enumerate() {
        let line = match &item.outcome {
            ItemOutcome::Annotated { boxes } => format!("{} detection(s)", boxes),
            ItemOutcome::NoDetections => "nothing detected".to_string(),
            ItemOutcome::Failed(e) => format!("failed: {}", e),
            ItemOutcome::Dropped => "removed during processing".to_string(),
        };
        println!("{:>2}. {} - {}", index + 1, item.name, line);
    }
    println!("{} annotated, {} failed.", report.annotated(), report.failed());
    Ok(())
}

fn draw_progress(tracker: &ProgressTracker, names: &HashMap<ImageId, String>) {
    const WIDTH: usize = 24;

    let Some((id, frame)) = tracker.current(Instant::now()) else {
        return;
    };

    let filled = (frame.fraction * WIDTH as f64).round() as usize;
    let name = names.get(&id).map(String::as_str).unwrap_or("?");
    let mark = if frame.check_mark { " ok" } else { "" };
    eprint!(
        "\r{:<20.20} [{}{}] {:>3.0}%{:<3}",
        name,
        "#".repeat(filled.min(WIDTH)),
        ".".repeat(WIDTH - filled.min(WIDTH)),
        frame.fraction * 100.0,
        mark
    );
}
