//! A single-function HTTP server with an explicit lifecycle.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::handler::HttpHandler;

/// Serves one [`HttpHandler`] on a bound socket.
///
/// `start` and `stop` are idempotent: starting a running server or stopping
/// a stopped one does nothing. Stopping a server that never started leaves
/// it bound. A stopped server cannot be restarted.
///
/// ```rust,no_run
/// # async fn run(handler: wirefn_http::HttpHandler) -> std::io::Result<()> {
/// use wirefn_http::HttpServer;
///
/// let server = HttpServer::bind("127.0.0.1:3000", handler).await?;
/// server.start().await?;
/// // ...
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct HttpServer {
    handler: HttpHandler,
    local_addr: SocketAddr,
    state: Mutex<State>,
}

enum State {
    Bound(TcpListener),
    Running {
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<io::Result<()>>,
    },
    Stopped,
}

impl HttpServer {
    /// Bind the listening socket without accepting connections yet.
    pub async fn bind(addr: impl ToSocketAddrs, handler: HttpHandler) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            handler,
            local_addr,
            state: Mutex::new(State::Bound(listener)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handler(&self) -> &HttpHandler {
        &self.handler
    }

    /// Start accepting connections in a background task.
    pub async fn start(&self) -> io::Result<()> {
        let mut state = self.state.lock().await;
        let listener = match std::mem::replace(&mut *state, State::Stopped) {
            State::Bound(listener) => listener,
            running @ State::Running { .. } => {
                *state = running;
                return Ok(());
            }
            State::Stopped => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "server has been stopped",
                ))
            }
        };

        let (shutdown, signal) = oneshot::channel::<()>();
        let app = self
            .handler
            .clone()
            .into_router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    signal.await.ok();
                })
                .await
        });

        tracing::info!(
            function = %self.handler.definition().title,
            "Accepting connections on {}",
            self.local_addr
        );
        *state = State::Running { shutdown, task };
        Ok(())
    }

    /// Stop accepting connections and wait for in-flight requests.
    ///
    /// A server that was never started keeps its socket and can still be
    /// started.
    pub async fn stop(&self) -> io::Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, State::Bound(_)) {
            return Ok(());
        }
        match std::mem::replace(&mut *state, State::Stopped) {
            State::Running { shutdown, task } => {
                // The server may already have exited on its own.
                let _ = shutdown.send(());
                let result = task
                    .await
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                tracing::info!(
                    function = %self.handler.definition().title,
                    "Stopped accepting connections on {}",
                    self.local_addr
                );
                result
            }
            State::Bound(_) | State::Stopped => Ok(()),
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, State::Running { .. })
    }
}
