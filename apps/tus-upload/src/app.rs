//! Wires the transport, resume store and registry together and drives the
//! uploads named on the command line.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use tusclient_http::{HttpConfig, HttpTransport};
use tusclient_protocol::{UploadEvent, UploadOptions};
use tusclient_transfer::{
    FileResumeStore, MemoryResumeStore, ResumeStore, SpeedCalculator, default_store_path,
    resolve_file_ref,
};
use tusclient_uploader::{RegistryConfig, SessionRegistry, default_pool_size};

use crate::cli::Args;
use crate::config::Config;

/// One upload the command line asked for.
struct Tracker {
    file: String,
    speed: SpeedCalculator,
}

/// Runs every upload until it finishes, fails, or Ctrl-C pauses it.
pub async fn run(args: Args, config: Config) -> anyhow::Result<()> {
    if args.upload_id.is_some() && args.files.len() != 1 {
        bail!("--upload-id needs exactly one file");
    }
    let base = upload_options(&args, &config)?;

    let transport = HttpTransport::new(&HttpConfig {
        timeout: config.timeout_secs.map(Duration::from_secs),
        ..HttpConfig::default()
    })?;
    let registry = SessionRegistry::new(
        Arc::new(transport),
        open_store(&config),
        RegistryConfig {
            workers: args.workers.or(config.workers).unwrap_or_else(default_pool_size),
            ..RegistryConfig::default()
        },
    );
    let mut events = registry
        .take_events()
        .ok_or_else(|| anyhow!("event stream already taken"))?;

    let mut pending = HashMap::new();
    for file in &args.files {
        let options = with_filename(&base, file);
        let upload_id = match &args.upload_id {
            Some(id) => id.clone(),
            None => registry
                .create(file, &options)
                .with_context(|| format!("cannot upload {file}"))?,
        };
        if !registry.resume(&upload_id, file, &options) {
            bail!("cannot start upload of {file}");
        }
        println!("{upload_id}\t{file}");
        pending.insert(
            upload_id,
            Tracker {
                file: file.clone(),
                speed: SpeedCalculator::new(None, None),
            },
        );
    }

    let total = pending.len();
    let mut failed = 0;
    let interrupted = loop {
        if pending.is_empty() {
            break false;
        }
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break false };
                handle_event(event, &mut pending, &mut failed);
            }
            _ = tokio::signal::ctrl_c() => break true,
        }
    };

    if interrupted {
        eprintln!("interrupted, pausing uploads");
        for upload_id in pending.keys() {
            registry.abort(upload_id).await;
        }
    }

    // Keep draining so in-flight runs can report while the pool stops.
    let shutdown = registry.shutdown();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(event) = events.recv() => handle_event(event, &mut pending, &mut failed),
        }
    }
    while let Ok(event) = events.try_recv() {
        handle_event(event, &mut pending, &mut failed);
    }

    for (upload_id, tracker) in &pending {
        let offset = registry.get(upload_id).map(|s| s.offset()).unwrap_or(0);
        eprintln!(
            "{}: paused at {}; rerun with --upload-id {upload_id} to resume",
            tracker.file,
            format_bytes(offset)
        );
    }

    if failed > 0 {
        bail!("{failed} of {total} uploads failed");
    }
    Ok(())
}

fn handle_event(event: UploadEvent, pending: &mut HashMap<String, Tracker>, failed: &mut usize) {
    match event {
        UploadEvent::Progress {
            upload_id,
            bytes_written,
            bytes_total,
        } => {
            let Some(tracker) = pending.get(&upload_id) else {
                return;
            };
            tracker.speed.record(bytes_written);
            let rate = tracker.speed.bytes_per_second();
            let eta = tracker
                .speed
                .eta(bytes_total.saturating_sub(bytes_written))
                .map(format_eta)
                .unwrap_or_else(|| "--".into());
            eprintln!(
                "{}: {:5.1}%  {} / {}  {}/s  eta {eta}",
                tracker.file,
                percent(bytes_written, bytes_total),
                format_bytes(bytes_written),
                format_bytes(bytes_total),
                format_bytes(rate as u64),
            );
        }
        UploadEvent::Success {
            upload_id,
            upload_url,
        } => {
            pending.remove(&upload_id);
            println!("{upload_id}\tdone\t{upload_url}");
        }
        UploadEvent::Error { upload_id, error } => {
            if let Some(tracker) = pending.remove(&upload_id) {
                eprintln!("{}: upload failed: {error}", tracker.file);
                *failed += 1;
            }
        }
    }
}

/// Merges the configuration file with command-line flags, flags winning.
fn upload_options(args: &Args, config: &Config) -> anyhow::Result<UploadOptions> {
    let endpoint = args
        .endpoint
        .clone()
        .or_else(|| config.endpoint.clone())
        .ok_or_else(|| anyhow!("no endpoint: pass --endpoint or set `endpoint` in the configuration"))?;

    let mut options = UploadOptions::new(endpoint);
    options.chunk_size = args.chunk_size.unwrap_or(config.chunk_size);
    options.request_payload_size = args.payload_size.unwrap_or(config.payload_size);
    options.checksum = args.checksum || config.checksum;
    options.headers = config.headers.clone();
    options.headers.extend(args.headers.iter().cloned());
    options.metadata.extend(args.metadata.iter().cloned());
    Ok(options)
}

fn with_filename(base: &UploadOptions, file: &str) -> UploadOptions {
    let mut options = base.clone();
    if !options.metadata.contains_key("filename")
        && let Ok(path) = resolve_file_ref(file)
        && let Some(name) = path.file_name()
    {
        options
            .metadata
            .insert("filename".into(), name.to_string_lossy().into_owned());
    }
    options
}

fn open_store(config: &Config) -> Arc<dyn ResumeStore> {
    let Some(path) = config.resume_store.clone().or_else(default_store_path) else {
        tracing::warn!("no configuration directory, resume records will not persist");
        return Arc::new(MemoryResumeStore::new());
    };
    match FileResumeStore::open(path.clone()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot open resume store, resume records will not persist");
            Arc::new(MemoryResumeStore::new())
        }
    }
}

fn percent(written: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    written as f64 * 100.0 / total as f64
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}
