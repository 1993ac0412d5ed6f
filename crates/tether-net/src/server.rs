//! WebSocket listener.
//!
//! Accepts inbound connections, gives each one its own session, and feeds
//! decoded frames through the shell. One task per connection; command
//! execution runs on the blocking pool so a slow command only stalls its
//! own session.

use std::future::{self, Future};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tether_terminal::{
    Input, Prompt, Reply, SessionHandle, SessionId, SessionManager, Shell, lock_session,
};
use tether_types::config::ServerConfig;
use tether_types::error::{Result, TetherError};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::protocol;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

fn transport(e: tungstenite::Error) -> TetherError {
    TetherError::Transport(e.to_string())
}

/// Counts live connections against the configured maximum.
struct ConnectionLimit {
    active: AtomicUsize,
    max: usize,
}

impl ConnectionLimit {
    fn new(max: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max,
        }
    }

    /// Take a slot if one is free.
    fn try_acquire(&self) -> bool {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

struct ServerState {
    shell: Shell,
    sessions: Arc<SessionManager>,
    limit: ConnectionLimit,
    idle_timeout: Option<Duration>,
    max_line_len: usize,
}

/// Releases the connection slot and drops the session however the
/// connection task ends.
struct ConnectionGuard {
    state: Arc<ServerState>,
    id: SessionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.sessions.remove(self.id);
        self.state.limit.release();
    }
}

/// A bound WebSocket server.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Bind to `config.bind:config.port`.
    pub async fn bind(
        config: &ServerConfig,
        shell: Shell,
        sessions: Arc<SessionManager>,
    ) -> Result<Self> {
        let addr = format!("{}:{}", config.bind, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| TetherError::resource(&addr, e))?;
        let state = ServerState {
            shell,
            sessions,
            limit: ConnectionLimit::new(config.max_connections),
            idle_timeout: (config.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(config.idle_timeout_secs)),
            max_line_len: config.max_line_len,
        };
        Ok(Self {
            listener,
            state: Arc::new(state),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process is stopped.
    pub async fn run(self) -> Result<()> {
        self.run_until(future::pending()).await
    }

    /// Serve until `shutdown` resolves. Connections already accepted keep
    /// running on their own tasks.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        log::info!("listening on ws://{}", self.local_addr()?);
        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    log::info!("listener shutting down");
                    return Ok(());
                },
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        log::info!("connection from {peer}");
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(state, stream).await {
                                log::warn!("connection {peer}: {e}");
                            }
                            log::info!("connection {peer} closed");
                        });
                    },
                    Err(e) => log::warn!("accept error: {e}"),
                },
            }
        }
    }
}

async fn send_text(sink: &mut WsSink, text: String) -> Result<()> {
    sink.send(Message::Text(text)).await.map_err(transport)
}

async fn serve_connection(state: Arc<ServerState>, stream: TcpStream) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(transport)?;
    let (mut sink, mut source) = ws.split();

    if !state.limit.try_acquire() {
        log::warn!("connection limit reached, refusing");
        send_text(&mut sink, protocol::REFUSED.to_string()).await?;
        return sink.close().await.map_err(transport);
    }
    let (id, session) = state.sessions.open();
    let _guard = ConnectionGuard {
        state: Arc::clone(&state),
        id,
    };
    log::debug!("session {id} opened, {} active", state.limit.active());

    let prompt = Prompt::for_session(&lock_session(&session)).render();
    send_text(&mut sink, prompt).await?;

    loop {
        let next = match state.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, source.next()).await {
                Ok(next) => next,
                Err(_) => {
                    log::info!("session {id} idle, closing");
                    send_text(&mut sink, protocol::IDLE_TIMEOUT.to_string()).await?;
                    return sink.close().await.map_err(transport);
                },
            },
            None => source.next().await,
        };
        let text = match next {
            None => return Ok(()),
            Some(Err(e)) => return Err(transport(e)),
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
            Some(Ok(Message::Close(_))) => return Ok(()),
            Some(Ok(_)) => continue,
        };

        if text.len() > state.max_line_len {
            send_text(&mut sink, protocol::line_too_long(state.max_line_len)).await?;
            let prompt = Prompt::for_session(&lock_session(&session)).render();
            send_text(&mut sink, prompt).await?;
            continue;
        }

        let reply = dispatch(&state, &session, protocol::decode(&text)).await;
        for frame in protocol::encode(&reply) {
            send_text(&mut sink, frame).await?;
        }
        if reply.close {
            return sink.close().await.map_err(transport);
        }
    }
}

/// Run one input on the blocking pool. A panicking command is reported to
/// its own session only.
async fn dispatch(state: &Arc<ServerState>, session: &SessionHandle, input: Input) -> Reply {
    let task_state = Arc::clone(state);
    let handle = Arc::clone(session);
    let joined = tokio::task::spawn_blocking(move || {
        let mut session = lock_session(&handle);
        task_state.shell.handle(&mut session, input)
    })
    .await;
    match joined {
        Ok(reply) => reply,
        Err(e) => {
            let e = TetherError::Session(format!("command task failed: {e}"));
            log::warn!("{e}");
            Reply {
                output: Some(e.to_string()),
                prompt: Some(Prompt::for_session(&lock_session(session))),
                close: false,
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_refuses_past_max() {
        let limit = ConnectionLimit::new(2);
        assert!(limit.try_acquire());
        assert!(limit.try_acquire());
        assert!(!limit.try_acquire());
        assert_eq!(limit.active(), 2);
        limit.release();
        assert!(limit.try_acquire());
    }

    #[test]
    fn zero_limit_refuses_everything() {
        let limit = ConnectionLimit::new(0);
        assert!(!limit.try_acquire());
        assert_eq!(limit.active(), 0);
    }
}
