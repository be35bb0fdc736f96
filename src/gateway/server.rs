use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::CatalogServerError;

use super::command::{AdminRequest, AdminResponse, ErrorKind};
use super::Gateway;

/// Longest request line accepted, newline included.
pub const MAX_REQUEST_LINE: usize = 64 * 1024;

pub struct TcpServer {
    listener: TcpListener,
    gateway: Arc<Gateway>,
}

pub struct ServerHandle {
    addr: SocketAddr,
    stop_ch: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn stop(self) -> Result<()> {
        self.stop_ch
            .send(())
            .await
            .map_err(|_| CatalogServerError::FailedToStopTcpServer)?;
        self.join.await?;
        Ok(())
    }
}

impl TcpServer {
    pub async fn bind(addr: &str, gateway: Arc<Gateway>) -> Result<Self> {
        let listener = match TcpListener::bind(addr).await {
            Ok(v) => v,
            Err(e) => {
                error!("failed to bind address {}, err: {}", addr, e);
                bail!(e);
            }
        };

        Ok(Self { listener, gateway })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn start(self) -> Result<ServerHandle> {
        let addr = self.local_addr()?;
        let (tx, rx) = mpsc::channel(1);

        let join = tokio::spawn(async move {
            info!("admin server listening on {}", addr);
            self.serve(rx).await;
            info!("exit from admin server loop");
        });

        Ok(ServerHandle {
            addr,
            stop_ch: tx,
            join,
        })
    }

    async fn serve(self, mut stop_rx: mpsc::Receiver<()>) {
        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    info!("receive stop message, break from admin server loop");
                    break;
                }
                val = self.listener.accept() => {
                    let (socket, addr) = match val {
                        Ok(v) => v,
                        Err(e) => {
                            error!("failed to accept connection, err: {}", e);
                            continue;
                        }
                    };
                    debug!("accept connection from {}", addr);

                    let gateway = self.gateway.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(socket, gateway).await {
                            match e.downcast_ref::<CatalogServerError>() {
                                Some(CatalogServerError::ConnectionClosed) => {
                                    debug!("connection from {} closed", addr);
                                }
                                _ => warn!("connection from {} failed, err: {}", addr, e),
                            }
                        }
                    });
                }
            }
        }
    }
}

async fn serve_connection(socket: TcpStream, gateway: Arc<Gateway>) -> Result<()> {
    let (rx, mut tx) = socket.into_split();
    let mut reader = BufReader::new(rx);
    let mut line = String::new();

    loop {
        line.clear();
        let n = (&mut reader)
            .take(MAX_REQUEST_LINE as u64 + 1)
            .read_line(&mut line)
            .await?;
        if n == 0 {
            bail!(CatalogServerError::ConnectionClosed);
        }

        if n > MAX_REQUEST_LINE {
            warn!("request line longer than {} bytes, closing", MAX_REQUEST_LINE);
            let resp = AdminResponse::error(
                ErrorKind::BadRequest,
                format!("request exceeds {MAX_REQUEST_LINE} bytes"),
            );
            send_response(&mut tx, &resp).await?;
            bail!(CatalogServerError::ConnectionClosed);
        }
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<AdminRequest>(&line) {
            Ok(req) => gateway.handle(req).await,
            Err(e) => {
                warn!("malformed admin request, err: {}", e);
                AdminResponse::error(ErrorKind::BadRequest, format!("malformed request: {e}"))
            }
        };

        send_response(&mut tx, &resp).await?;
    }
}

async fn send_response(tx: &mut OwnedWriteHalf, resp: &AdminResponse) -> Result<()> {
    let mut out = serde_json::to_vec(resp)?;
    out.push(b'\n');
    if let Err(e) = tx.write_all(&out).await {
        error!("failed to send response, err: {}", e);
        bail!(CatalogServerError::FailedToSend);
    }
    Ok(())
}
