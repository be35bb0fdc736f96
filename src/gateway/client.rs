use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::catalog_cache::CatalogSource;
use crate::error::CatalogServerError;
use crate::metadata::{DatabaseMetadata, StoreError};

use super::command::{AdminRequest, AdminResponse, ErrorKind};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn connect(addr: &str) -> Result<Self> {
        info!("create connection to {}", addr);

        let stream = TcpStream::connect(addr).await.map_err(|e| {
            warn!("failed to connect to {}, err: {}", addr, e);
            CatalogServerError::FailedToConnect
        })?;
        stream.set_nodelay(true)?;

        let (rx, tx) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(rx),
            writer: tx,
        })
    }

    async fn round_trip(&mut self, req: &AdminRequest) -> Result<AdminResponse> {
        let mut line = serde_json::to_vec(req)?;
        line.push(b'\n');

        if let Err(e) = self.writer.write_all(&line).await {
            warn!("failed to send request, err: {}", e);
            bail!(CatalogServerError::FailedToSend);
        }

        let mut buf = String::new();
        match self.reader.read_line(&mut buf).await {
            Ok(0) => bail!(CatalogServerError::ConnectionClosed),
            Ok(_) => (),
            Err(e) => {
                warn!("failed to receive response, err: {}", e);
                bail!(CatalogServerError::FailedToReceive);
            }
        }

        Ok(serde_json::from_str(&buf)?)
    }
}

/// Client side of the admin protocol, keeps one connection and reconnects
/// after any failure.
pub struct AdminClient {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl AdminClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn call(&self, req: &AdminRequest) -> Result<AdminResponse> {
        let mut conn = self.conn.lock().await;
        if conn.is_none() {
            conn.replace(Connection::connect(&self.addr).await?);
        }
        let Some(c) = conn.as_mut() else {
            bail!(CatalogServerError::FailedToConnect);
        };

        debug!("send {} to {}", req.name(), self.addr);
        match tokio::time::timeout(self.timeout, c.round_trip(req)).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => {
                conn.take();
                Err(e)
            }
            Err(_) => {
                conn.take();
                warn!("{} to {} timed out after {:?}", req.name(), self.addr, self.timeout);
                bail!(CatalogServerError::FailedToReceive)
            }
        }
    }

    pub async fn ping(&self) -> Result<()> {
        let resp = self.call(&AdminRequest::Ping).await?;
        if !resp.ok {
            bail!("ping failed: {:?}", resp.errmsg);
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for AdminClient {
    async fn fetch(&self, name: &str) -> Result<Option<DatabaseMetadata>, StoreError> {
        let req = AdminRequest::GetDatabase {
            database: name.to_owned(),
        };
        let resp = self
            .call(&req)
            .await
            .map_err(|e| StoreError::Unavailable(format!("coordinator {}: {e}", self.addr)))?;

        if resp.ok {
            return match resp.database {
                Some(meta) => Ok(Some(meta)),
                None => Err(StoreError::Unavailable(
                    "coordinator returned no database".into(),
                )),
            };
        }

        match resp.error_kind {
            Some(ErrorKind::DatabaseNotFound) => Ok(None),
            Some(ErrorKind::NameConflict) => Err(StoreError::NameConflict {
                requested: name.to_owned(),
                existing: resp.existing_database.unwrap_or_default(),
            }),
            _ => Err(StoreError::Unavailable(resp.errmsg.unwrap_or_default())),
        }
    }
}
