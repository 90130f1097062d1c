use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable file uploads to a tus server", long_about = None)]
pub struct Args {
    /// Files to upload (paths or file:// URIs)
    #[arg(required = true)]
    pub files: Vec<String>,

    /// Creation URL of the tus server
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Bytes per chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Maximum bytes per PATCH request
    #[arg(long)]
    pub payload_size: Option<usize>,

    /// Extra request header, repeatable
    #[arg(long = "header", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub headers: Vec<(String, String)>,

    /// Upload metadata entry, repeatable. `filename` defaults to the file name
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub metadata: Vec<(String, String)>,

    /// Id to report a single upload under, as printed by an interrupted run
    #[arg(long)]
    pub upload_id: Option<String>,

    /// Uploads to run at once
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Configuration file (default: ~/.config/tusclient/client.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Send an Upload-Checksum header with every request
    #[arg(long)]
    pub checksum: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}
