//! Websocket tunnels: VNC framebuffer and container-log streaming.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::state::AppState;

const COPY_BUF_BYTES: usize = 8192;

/// `GET /vnc/<id>` — bridge the websocket to the session's VNC TCP endpoint.
pub async fn vnc_tunnel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(err) = bridge_vnc(state, id, socket).await {
            debug!(error = %err, "vnc tunnel closed with error");
        }
    })
}

async fn bridge_vnc(state: AppState, id: String, socket: WebSocket) -> anyhow::Result<()> {
    let Some(session) = state.sessions.get(&id) else {
        warn!(session = %id, "session not found");
        return Ok(());
    };
    let Some(endpoint) = session.vnc.clone() else {
        warn!(session = %id, "vnc not enabled");
        return Ok(());
    };

    info!(session = %id, endpoint = %endpoint, "vnc client connected");
    let tcp = TcpStream::connect(&endpoint).await?;
    let (mut tcp_rx, mut tcp_tx) = tcp.into_split();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let client_to_tcp = async {
        while let Some(msg) = ws_rx.next().await {
            match msg? {
                Message::Binary(data) => tcp_tx.write_all(&data).await?,
                Message::Text(text) => tcp_tx.write_all(text.as_bytes()).await?,
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    let tcp_to_client = async {
        let mut buf = vec![0u8; COPY_BUF_BYTES];
        loop {
            let n = tcp_rx.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            ws_tx
                .send(Message::Binary(Bytes::copy_from_slice(&buf[..n])))
                .await?;
        }
        Ok::<(), anyhow::Error>(())
    };

    // Either side ending tears both down.
    tokio::select! {
        result = client_to_tcp => result?,
        result = tcp_to_client => result?,
    }

    info!(session = %id, "vnc client disconnected");
    Ok(())
}

/// `GET /logs/<id>` — stream the container's combined output, follow-mode.
pub async fn log_tunnel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(err) = bridge_logs(state, id, socket).await {
            debug!(error = %err, "log tunnel closed with error");
        }
    })
}

async fn bridge_logs(state: AppState, id: String, socket: WebSocket) -> anyhow::Result<()> {
    let container = match state.sessions.get(&id) {
        Some(session) => match session.container.clone().filter(|c| !c.is_empty()) {
            Some(container) => container,
            None => {
                warn!(session = %id, "session has no container to tail");
                return Ok(());
            }
        },
        None => {
            warn!(session = %id, "session not found");
            return Ok(());
        }
    };

    info!(session = %id, container = %container, "streaming container logs");
    let stream = state.manager.follow_logs(&container).await?;
    // The process handle must outlive the pumps; dropping it stops the tail.
    let (stdout, stderr, _process) = stream.into_parts();

    let (tx, mut rx) = mpsc::channel::<Bytes>(16);
    tokio::spawn(pump_reader(stdout, tx.clone()));
    if let Some(stderr) = stderr {
        tokio::spawn(pump_reader(stderr, tx.clone()));
    }
    drop(tx);

    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(data) => ws_tx.send(Message::Binary(data)).await?,
                None => break,
            },
            msg = ws_rx.next() => match msg {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    info!(session = %id, "log client disconnected");
    Ok(())
}

async fn pump_reader(mut reader: Box<dyn AsyncRead + Send + Unpin>, tx: mpsc::Sender<Bytes>) {
    let mut buf = vec![0u8; COPY_BUF_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                    break;
                }
            }
        }
    }
}
