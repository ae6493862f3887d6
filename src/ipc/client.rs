//! Command-line client for the control socket

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::net::UnixStream;
use tracing::debug;

use super::protocol::{read_message, write_message, Request};

pub const USAGE: &str =
    "usage: pose-overlay [ping | status | toggle | exit-fullscreen | snapshot <path> | subscribe]";

/// Map command-line arguments (without the program name) to a request
pub fn parse_command(args: &[String]) -> Result<Request> {
    let request = match args {
        [cmd] => match cmd.as_str() {
            "ping" => Request::Ping,
            "status" => Request::GetStatus,
            "toggle" => Request::Toggle,
            "exit-fullscreen" => Request::ExitFullscreen,
            "subscribe" => Request::Subscribe,
            _ => bail!("unknown command {:?}\n{}", cmd, USAGE),
        },
        [cmd, path] if cmd == "snapshot" => Request::Snapshot {
            path: absolute(Path::new(path))?,
        },
        _ => bail!(USAGE),
    };
    Ok(request)
}

/// The overlay process has its own working directory
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to read working directory")?;
    Ok(cwd.join(path))
}

/// Send one request and print replies as JSON lines.
///
/// A subscription keeps printing notifications until the server hangs up.
pub async fn send(socket_path: &Path, request: Request) -> Result<()> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("failed to connect to {}", socket_path.display()))?;

    let subscribe = request == Request::Subscribe;
    debug!(?request, "sending request");
    write_message(&mut stream, &request).await?;

    while let Some(body) = read_message(&mut stream).await? {
        let reply: serde_json::Value =
            serde_json::from_slice(&body).context("failed to parse reply")?;
        println!("{}", reply);

        if reply["type"] == "error" {
            bail!("request failed: {}", reply["message"].as_str().unwrap_or("unknown error"));
        }
        if !subscribe {
            break;
        }
    }
    Ok(())
}
