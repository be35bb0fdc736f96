use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogServerError {
    #[error("failed to stop tcp server")]
    FailedToStopTcpServer,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("failed to receive")]
    FailedToReceive,
    #[error("failed to send")]
    FailedToSend,
    #[error("failed to connect")]
    FailedToConnect,
    #[error("invalid toml")]
    InvalidToml,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read")]
    FailedToRead,
    #[error("path not exists")]
    PathNotExists,
    #[error("not a directory")]
    NotDir,
}
