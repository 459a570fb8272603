use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "doorgate", about = "doorgate access-control CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Show the current result and enrolled count
    View {
        /// Write the current frame to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Arm one detection attempt
    Arm,
    /// Enroll the face in the current frame
    Enroll,
    /// Submit an image file as the next frame
    Submit {
        image: PathBuf,
    },
    /// Re-submit an image file on an interval (frame pump)
    Watch {
        image: PathBuf,
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
    /// Print access decisions as the daemon emits them
    Decisions,
}

// `#[zbus::proxy]` generates `GateProxy` (async) and `GateProxyBlocking`.
#[zbus::proxy(
    interface = "org.doorgate.Gate1",
    default_service = "org.doorgate.Gate1",
    default_path = "/org/doorgate/Gate1"
)]
trait Gate {
    async fn view(&self) -> zbus::Result<(Vec<u8>, String, u32)>;
    async fn arm_detect(&self) -> zbus::Result<()>;
    async fn enroll(&self) -> zbus::Result<String>;
    async fn submit_frame(&self, image: &[u8]) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn decision(&self, result: &str) -> zbus::Result<()>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    let gate = GateProxy::new(&conn)
        .await
        .context("doorgated is not reachable")?;

    match cli.command {
        Commands::Status => {
            let raw = gate.status().await?;
            let status: serde_json::Value = serde_json::from_str(&raw)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::View { save } => {
            let (frame, result, count) = gate.view().await?;
            println!("result: {result}");
            println!("enrolled faces: {count}");
            if frame.is_empty() {
                println!("frame: waiting for camera");
            } else {
                println!("frame: {} bytes", frame.len());
            }
            if let Some(path) = save {
                if frame.is_empty() {
                    bail!("no frame to save");
                }
                std::fs::write(&path, &frame)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("saved frame to {}", path.display());
            }
        }
        Commands::Arm => {
            gate.arm_detect().await?;
            println!("detection armed");
        }
        Commands::Enroll => {
            let status = gate.enroll().await?;
            println!("{}", describe_enroll(&status)?);
        }
        Commands::Submit { image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let outcome = gate.submit_frame(&bytes).await?;
            println!("{}", describe_submit(&outcome));
        }
        Commands::Watch { image, interval_ms } => {
            watch(&gate, &image, Duration::from_millis(interval_ms.max(10))).await?;
        }
        Commands::Decisions => {
            let mut decisions = gate.receive_decision().await?;
            println!("waiting for decisions (Ctrl-C to stop)");
            while let Some(signal) = decisions.next().await {
                let args = signal.args()?;
                println!("{}", args.result());
            }
        }
    }

    Ok(())
}

/// Push `image` to the daemon every `interval` until Ctrl-C.
///
/// An external capture tool is expected to keep overwriting the file.
async fn watch(gate: &GateProxy<'_>, image: &Path, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    println!("pumping {} every {interval:?} (Ctrl-C to stop)", image.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let bytes = match tokio::fs::read(image).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, path = %image.display(), "frame not readable yet");
                continue;
            }
        };

        let outcome = gate.submit_frame(&bytes).await?;
        if outcome != "idle" {
            println!("{}", describe_submit(&outcome));
        }
    }
}

fn describe_enroll(status: &str) -> Result<&'static str> {
    match status {
        "success" => Ok("face enrolled"),
        "no_face_detected" => Ok("no face detected in the current frame; nothing enrolled"),
        "capture_error" => bail!("capture failed; nothing enrolled"),
        "storage_error" => bail!("enrollment could not be saved; nothing enrolled"),
        other => bail!("unexpected enroll status '{other}'"),
    }
}

fn describe_submit(outcome: &str) -> String {
    match outcome {
        "idle" => "frame accepted (detection not armed)".into(),
        "no_enrollments" => "no faces enrolled; detection cancelled".into(),
        "authorized" => "ACCESS GRANTED".into(),
        "unauthorized" => "ACCESS DENIED".into(),
        other => format!("unexpected outcome '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_watch_defaults() {
        let cli = Cli::try_parse_from(["doorgate", "--session", "watch", "/tmp/frame.jpg"]).unwrap();
        assert!(cli.session);
        match cli.command {
            Commands::Watch { image, interval_ms } => {
                assert_eq!(image, PathBuf::from("/tmp/frame.jpg"));
                assert_eq!(interval_ms, 500);
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_describe_enroll() {
        assert_eq!(describe_enroll("success").unwrap(), "face enrolled");
        assert!(describe_enroll("no_face_detected").is_ok());
        assert!(describe_enroll("capture_error").is_err());
        assert!(describe_enroll("storage_error").is_err());
        assert!(describe_enroll("bogus").is_err());
    }

    #[test]
    fn test_describe_submit() {
        assert_eq!(describe_submit("authorized"), "ACCESS GRANTED");
        assert_eq!(describe_submit("unauthorized"), "ACCESS DENIED");
        assert!(describe_submit("weird").contains("weird"));
    }
}
