//! Jobwire CLI - watch the job stream or submit jobs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobwire::{ChannelConfig, JobChannel, JobCommand, ServerFrame};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const ACK_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_GRACE: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "jobwire")]
#[command(about = "Jobwire CLI - real-time job-status channel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base address of the job processor (http, https, ws or wss)
    #[arg(long, env = "JOBWIRE_URL", default_value = "http://localhost:8000", global = true)]
    url: String,

    /// Path of the job-status endpoint
    #[arg(long, env = "JOBWIRE_PATH", default_value = jobwire::DEFAULT_JOBS_PATH, global = true)]
    path: String,

    /// Give up after the first abnormal closure
    #[arg(long, global = true)]
    no_reconnect: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every status frame until Ctrl-C
    Watch,

    /// Submit a job for an uploaded file
    ///
    /// Examples:
    ///   jobwire submit job-42 https://cdn.example.com/upload.mp4
    ///   jobwire submit job-42 https://cdn.example.com/upload.mp4 --file-name upload.mp4 --file-size 73400320 --wait
    Submit {
        /// Job identifier
        job_id: String,

        /// URL of the uploaded source file
        source_url: String,

        /// Original file name
        #[arg(long)]
        file_name: Option<String>,

        /// File size in bytes
        #[arg(long, requires = "file_name")]
        file_size: Option<u64>,

        /// Keep printing frames for this job until Ctrl-C
        #[arg(long)]
        wait: bool,
    },

    /// Print the derived WebSocket endpoint
    Endpoint,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // wss needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Initialize minimal tracing for CLI
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let cli = Cli::parse();

    let mut config = ChannelConfig::new(cli.url).path(cli.path);
    if cli.no_reconnect {
        config = config.no_reconnect();
    }

    match cli.command {
        Commands::Watch => watch(config).await,

        Commands::Submit {
            job_id,
            source_url,
            file_name,
            file_size,
            wait,
        } => submit(config, job_id, source_url, file_name, file_size, wait).await,

        Commands::Endpoint => {
            let endpoint = config.endpoint_url().context("Invalid base address")?;
            println!("{}", endpoint);
            Ok(())
        }
    }
}

/// Connect and print frames (optionally only those for one job) to stdout
async fn open(config: ChannelConfig, job_id: Option<String>) -> Result<(JobChannel, Acks)> {
    let channel = JobChannel::new(config);
    let endpoint = channel.endpoint().context("Invalid base address")?;
    let (ack_tx, ack_rx) = mpsc::unbounded_channel();

    channel.on_connection_change(|connected| {
        if connected {
            eprintln!("● connected");
        } else {
            eprintln!("○ disconnected");
        }
    });

    channel.on_message(move |frame: &ServerFrame| {
        if let Some(job_id) = &job_id {
            if !frame.is_for(job_id) {
                return;
            }
        }
        match serde_json::to_string(frame) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("unprintable frame: {}", e),
        }
        let _ = ack_tx.send(frame.clone());
    });

    channel
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", endpoint))?;

    Ok((channel, ack_rx))
}

type Acks = mpsc::UnboundedReceiver<ServerFrame>;

async fn watch(config: ChannelConfig) -> Result<()> {
    let (channel, _) = open(config, None).await?;
    wait_for_exit(&channel).await;
    close(&channel).await;
    Ok(())
}

async fn submit(
    config: ChannelConfig,
    job_id: String,
    source_url: String,
    file_name: Option<String>,
    file_size: Option<u64>,
    wait: bool,
) -> Result<()> {
    let command = new_job_command(&job_id, source_url, file_name, file_size);

    let (channel, mut acks) = open(config, Some(job_id.clone())).await?;
    channel
        .send_job(&command)
        .with_context(|| format!("Failed to submit job {}", job_id))?;
    eprintln!("submitted {}", job_id);

    if wait {
        wait_for_exit(&channel).await;
    } else {
        match timeout(ACK_TIMEOUT, acks.recv()).await {
            Ok(Some(frame)) if frame.is_error() => {
                close(&channel).await;
                anyhow::bail!(
                    "Job {} rejected: {}",
                    job_id,
                    frame.error.unwrap_or_default()
                );
            }
            Ok(_) => {}
            Err(_) => eprintln!("no acknowledgement for {} within {:?}", job_id, ACK_TIMEOUT),
        }
    }

    close(&channel).await;
    Ok(())
}

/// `new_job` command; file details are passed through as given
fn new_job_command(
    job_id: &str,
    source_url: String,
    file_name: Option<String>,
    file_size: Option<u64>,
) -> JobCommand {
    let mut command = JobCommand::new_job(job_id, source_url);
    command.file_name = file_name;
    command.file_size = file_size;
    command
}

/// Block until Ctrl-C or until the channel gives up reconnecting
async fn wait_for_exit(channel: &JobChannel) {
    let mut states = channel.state_receiver();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = states.wait_for(|state| state.is_terminal()) => {
            eprintln!("connection closed for good");
        }
    }
}

/// Disconnect and give the close frame a moment to go out before exit
async fn close(channel: &JobChannel) {
    channel.disconnect();
    sleep(CLOSE_GRACE).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_without_size_omits_size() {
        let command = new_job_command(
            "job-1",
            "https://cdn.example.com/a.mp4".to_string(),
            Some("a.mp4".to_string()),
            None,
        );

        assert_eq!(command.file_name.as_deref(), Some("a.mp4"));
        assert_eq!(command.file_size, None);
        assert_eq!(
            jobwire::encode(&command).unwrap(),
            r#"{"kind":"new_job","job_id":"job-1","source_url":"https://cdn.example.com/a.mp4","file_name":"a.mp4"}"#
        );
    }

    #[test]
    fn test_file_name_and_size() {
        let command = new_job_command(
            "job-2",
            "https://cdn.example.com/b.mp4".to_string(),
            Some("b.mp4".to_string()),
            Some(4096),
        );

        assert_eq!(command.file_size, Some(4096));
    }

    #[test]
    fn test_cli_rejects_size_without_name() {
        let result = Cli::try_parse_from([
            "jobwire",
            "submit",
            "job-3",
            "https://cdn.example.com/c.mp4",
            "--file-size",
            "10",
        ]);

        assert!(result.is_err());
    }
}
