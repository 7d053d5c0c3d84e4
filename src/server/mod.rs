// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use crate::handler::BaseHandler;
use crate::object_http::{ObjectHttpHandler, ResponseContext};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// Serve until `shutdown` flips to `true`, then stop accepting and drain.
    async fn serve(
        &self,
        addr: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Object HTTP connection manager using Axum.
#[derive(Clone)]
pub struct HttpConnectionManager {
    handler: ObjectHttpHandler,
}

impl HttpConnectionManager {
    pub fn new(handler: BaseHandler, ctx: ResponseContext) -> Self {
        Self {
            handler: ObjectHttpHandler::new_with_context(handler, ctx),
        }
    }

    /// Serve on an already bound listener.
    pub async fn serve_listener(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.handler.clone().router();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                tracing::info!("HTTP server no longer accepting connections");
            })
            .await?;
        Ok(())
    }
}

/// Bind a TCP listener with low-latency socket options.
pub fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // Disable Nagle's algorithm; responses are small and latency bound
    socket.set_nodelay(true)?;
    socket.set_reuse_address(true)?;
    // Required by tokio's from_std
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    TcpListener::from_std(socket.into())
}

#[async_trait]
impl ConnectionManager for HttpConnectionManager {
    async fn serve(
        &self,
        addr: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!("Starting object HTTP server on {}", addr);
        let listener = bind_listener(addr)?;
        tracing::info!("TCP optimizations enabled: TCP_NODELAY=true");
        self.serve_listener(listener, shutdown).await
    }
}
