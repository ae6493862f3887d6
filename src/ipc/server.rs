//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications for
//! controller events to subscribed clients. Requests are forwarded to the
//! controller task over its control channel; the server holds no overlay
//! state of its own.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::events::{ControlEvent, OverlayEvent};
use crate::platform::{Presentation, PresentationError};
use crate::render::RenderError;
use crate::state::CaptureStatus;

use super::protocol::{
    read_message, write_message, Notification, OverlayStatus, Request, Response,
};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    context: Arc<ClientContext>,
    shutdown_tx: broadcast::Sender<()>,
}

/// What every client handler needs
struct ClientContext {
    control_tx: mpsc::Sender<ControlEvent>,
    presentation: Arc<dyn Presentation>,
    event_tx: broadcast::Sender<OverlayEvent>,
    start_time: Instant,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        control_tx: mpsc::Sender<ControlEvent>,
        presentation: Arc<dyn Presentation>,
        event_tx: broadcast::Sender<OverlayEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            context: Arc::new(ClientContext {
                control_tx,
                presentation,
                event_tx,
                start_time: Instant::now(),
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection.
    ///
    /// Reading runs in its own task so that a half-read request is never
    /// abandoned when a notification needs to go out.
    async fn handle_client(stream: UnixStream, context: Arc<ClientContext>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let (request_tx, mut request_rx) = mpsc::channel(8);
        let reader_task = tokio::spawn(Self::read_requests(reader, request_tx));

        let mut events: Option<broadcast::Receiver<OverlayEvent>> = None;

        let result = loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else {
                        debug!("client disconnected");
                        break Ok(());
                    };

                    let response = match request {
                        Ok(request) => {
                            debug!(?request, "received request");
                            let (response, subscribe) =
                                Self::process_request(request, &context).await;
                            if subscribe && events.is_none() {
                                events = Some(context.event_tx.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            response
                        }
                        Err(message) => Response::error("bad_request", message),
                    };

                    if let Err(e) = write_message(&mut writer, &response).await {
                        break Err(e.into());
                    }
                }
                event = Self::next_event(&mut events) => match event {
                    Ok(event) => {
                        let notification = Notification::Event { event };
                        if let Err(e) = write_message(&mut writer, &notification).await {
                            break Err(e.into());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events = None;
                    }
                },
            }
        };

        reader_task.abort();
        result
    }

    /// Parse requests off the socket until it closes
    async fn read_requests(
        mut reader: OwnedReadHalf,
        request_tx: mpsc::Sender<Result<Request, String>>,
    ) {
        loop {
            let msg_buf = match read_message(&mut reader).await {
                Ok(Some(msg_buf)) => msg_buf,
                Ok(None) => return,
                Err(e) => {
                    warn!(?e, "failed to read request, disconnecting");
                    return;
                }
            };

            let request = serde_json::from_slice::<Request>(&msg_buf)
                .map_err(|e| format!("failed to parse request: {}", e));
            if request_tx.send(request).await.is_err() {
                return;
            }
        }
    }

    /// Next event for a subscribed client; never resolves otherwise
    async fn next_event(
        events: &mut Option<broadcast::Receiver<OverlayEvent>>,
    ) -> Result<OverlayEvent, broadcast::error::RecvError> {
        match events {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, context: &ClientContext) -> (Response, bool) {
        let response = match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => match Self::query_status(context).await {
                Ok(status) => Response::Status(OverlayStatus::new(
                    status,
                    context.start_time.elapsed().as_secs(),
                )),
                Err(response) => response,
            },

            Request::Toggle => {
                if context.control_tx.send(ControlEvent::Toggle).await.is_err() {
                    return (Self::unavailable(), false);
                }
                // The controller handles events in order, so this reflects the toggle
                match Self::query_status(context).await {
                    Ok(status) => {
                        info!(capture = %status.capture, "capture toggled via IPC");
                        Response::Toggled {
                            capture: status.capture,
                            toggle_label: status.toggle_label,
                        }
                    }
                    Err(response) => response,
                }
            }

            Request::ExitFullscreen => match context.presentation.exit_fullscreen().await {
                Ok(()) => Response::FullscreenExited,
                Err(e @ PresentationError::NotFullscreen) => {
                    Response::error("not_fullscreen", e.to_string())
                }
                Err(e) => Response::error("presentation", e.to_string()),
            },

            Request::Snapshot { path } => {
                let (reply, reply_rx) = oneshot::channel();
                if context
                    .control_tx
                    .send(ControlEvent::Snapshot { path, reply })
                    .await
                    .is_err()
                {
                    return (Self::unavailable(), false);
                }
                match reply_rx.await.unwrap_or(Err(RenderError::Dropped)) {
                    Ok(path) => Response::SnapshotSaved { path },
                    Err(e @ RenderError::NothingToCapture) => {
                        Response::error("nothing_to_capture", e.to_string())
                    }
                    Err(e) => Response::error("snapshot_failed", e.to_string()),
                }
            }

            Request::Subscribe => return (Response::Subscribed, true),
        };

        (response, false)
    }

    async fn query_status(context: &ClientContext) -> Result<CaptureStatus, Response> {
        let (reply, reply_rx) = oneshot::channel();
        context
            .control_tx
            .send(ControlEvent::Status { reply })
            .await
            .map_err(|_| Self::unavailable())?;
        reply_rx.await.map_err(|_| Self::unavailable())
    }

    fn unavailable() -> Response {
        Response::error("unavailable", "controller is not running")
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Controller, FrameClock};
    use crate::events::StopReason;
    use crate::platform::{HeadlessPresentation, VideoConstraints};
    use crate::render::DrawingStyle;
    use crate::state::CaptureState;
    use crate::test_support::{FakeDevices, FakeStream, RecordingPainter};

    struct Running {
        socket_path: PathBuf,
        server: Arc<Server>,
        _dir: tempfile::TempDir,
    }

    /// A server in front of a real controller driven by fakes
    fn start(devices: FakeDevices) -> Running {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("run").join("overlay.sock");

        let (control_tx, mut control_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(64);
        let presentation: Arc<dyn Presentation> =
            Arc::new(HeadlessPresentation::new(control_tx.clone()));
        let (painter, _draws) = RecordingPainter::new();

        let mut controller = Controller::new(
            Arc::new(devices),
            Arc::clone(&presentation),
            Box::new(painter),
            VideoConstraints::default(),
            DrawingStyle::default(),
            event_tx.clone(),
        );
        tokio::spawn(async move {
            controller.run(&mut control_rx, FrameClock::new(60.0)).await;
        });

        let server =
            Arc::new(Server::new(&socket_path, control_tx, presentation, event_tx).unwrap());
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await });

        Running {
            socket_path,
            server,
            _dir: dir,
        }
    }

    async fn send(stream: &mut UnixStream, request: &Request) {
        write_message(stream, request).await.unwrap();
    }

    async fn recv(stream: &mut UnixStream) -> serde_json::Value {
        let body = read_message(stream).await.unwrap().unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Next response, skipping notifications
    async fn response(stream: &mut UnixStream) -> Response {
        loop {
            let value = recv(stream).await;
            if value["type"] != "event" {
                return serde_json::from_value(value).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_socket_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let running = start(FakeDevices::default());
        let mode = std::fs::metadata(&running.socket_path)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);

        running.server.shutdown().await;
        assert!(!running.socket_path.exists());
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let running = start(FakeDevices::default());
        let mut client = UnixStream::connect(&running.socket_path).await.unwrap();

        send(&mut client, &Request::Ping).await;
        assert_eq!(response(&mut client).await, Response::Pong);

        send(&mut client, &Request::GetStatus).await;
        match response(&mut client).await {
            Response::Status(status) => {
                assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
                assert_eq!(status.controller.capture, CaptureState::Off);
                assert_eq!(status.controller.toggle_label, "Enable Webcam");
                assert!(!status.controller.engine_ready);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_toggle_and_escape() {
        let (stream, probe) = FakeStream::new(1280, 720);
        let running = start(FakeDevices::granting(vec![stream]));
        let mut client = UnixStream::connect(&running.socket_path).await.unwrap();

        send(&mut client, &Request::Subscribe).await;
        assert_eq!(response(&mut client).await, Response::Subscribed);

        send(&mut client, &Request::Toggle).await;
        assert_eq!(
            response(&mut client).await,
            Response::Toggled {
                capture: CaptureState::On,
                toggle_label: "Disable Webcam".to_string(),
            }
        );

        // Wait for the stream to be attached
        loop {
            let value = recv(&mut client).await;
            if value["type"] == "event" && value["event"]["type"] == "stream_attached" {
                assert_eq!(value["event"]["width"], 1280);
                break;
            }
        }

        send(&mut client, &Request::ExitFullscreen).await;
        assert_eq!(response(&mut client).await, Response::FullscreenExited);

        loop {
            let value = recv(&mut client).await;
            if value["type"] == "event" && value["event"]["type"] == "capture_stopped" {
                let event: OverlayEvent = serde_json::from_value(value["event"].clone()).unwrap();
                assert!(matches!(
                    event,
                    OverlayEvent::CaptureStopped {
                        reason: StopReason::FullscreenExit,
                        tracks_stopped: 1,
                        ..
                    }
                ));
                break;
            }
        }
        assert_eq!(probe.live_tracks(), 0);

        send(&mut client, &Request::ExitFullscreen).await;
        assert!(matches!(
            response(&mut client).await,
            Response::Error { code, .. } if code == "not_fullscreen"
        ));
    }

    #[tokio::test]
    async fn test_snapshot_without_frame() {
        let running = start(FakeDevices::default());
        let mut client = UnixStream::connect(&running.socket_path).await.unwrap();

        send(
            &mut client,
            &Request::Snapshot {
                path: running.socket_path.with_file_name("frame.png"),
            },
        )
        .await;
        assert!(matches!(
            response(&mut client).await,
            Response::Error { code, .. } if code == "nothing_to_capture"
        ));
    }

    #[tokio::test]
    async fn test_bad_request_keeps_connection() {
        let running = start(FakeDevices::default());
        let mut client = UnixStream::connect(&running.socket_path).await.unwrap();

        write_message(&mut client, &serde_json::json!({"type": "launch_rockets"}))
            .await
            .unwrap();
        assert!(matches!(
            response(&mut client).await,
            Response::Error { code, .. } if code == "bad_request"
        ));

        send(&mut client, &Request::Ping).await;
        assert_eq!(response(&mut client).await, Response::Pong);
    }
}
