use serde::{Deserialize, Serialize};

use crate::metadata::DatabaseMetadata;

/// Administrative commands, one JSON document per line on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum AdminRequest {
    EnableSharding {
        database: String,
    },
    CreateDatabase {
        database: String,
        #[serde(rename = "primaryShard")]
        primary_shard: String,
    },
    GetDatabase {
        database: String,
    },
    // asked by the collection-sharding path before it registers a collection
    EnsureShardingEnabled {
        database: String,
    },
    ListDatabases,
    Lookup {
        database: String,
    },
    InvalidateCache {
        database: String,
    },
    Ping,
}

impl AdminRequest {
    pub fn name(&self) -> &'static str {
        match self {
            AdminRequest::EnableSharding { .. } => "enableSharding",
            AdminRequest::CreateDatabase { .. } => "createDatabase",
            AdminRequest::GetDatabase { .. } => "getDatabase",
            AdminRequest::EnsureShardingEnabled { .. } => "ensureShardingEnabled",
            AdminRequest::ListDatabases => "listDatabases",
            AdminRequest::Lookup { .. } => "lookup",
            AdminRequest::InvalidateCache { .. } => "invalidateCache",
            AdminRequest::Ping => "ping",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DatabaseNotFound,
    NameConflict,
    InvalidName,
    Unavailable,
    ConcurrentModification,
    Timeout,
    DatabaseExists,
    ShardingNotEnabled,
    CacheMiss,
    BadRequest,
    NotSupported,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdminResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errmsg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub databases: Option<Vec<DatabaseMetadata>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_enabled: Option<bool>,
    // stored spelling of a name that collided on case folding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_database: Option<String>,
    // routing nodes that did not acknowledge the invalidation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreachable_routers: Vec<String>,
}

impl AdminResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn error(kind: ErrorKind, errmsg: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_kind: Some(kind),
            errmsg: Some(errmsg.into()),
            ..Default::default()
        }
    }

    pub fn with_database(mut self, meta: DatabaseMetadata) -> Self {
        self.database = Some(meta);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_request_wire_format() {
        let req: AdminRequest =
            serde_json::from_str(r#"{"cmd":"enableSharding","database":"sales"}"#).unwrap();
        assert_eq!(
            req,
            AdminRequest::EnableSharding {
                database: "sales".into()
            }
        );

        let req: AdminRequest = serde_json::from_str(
            r#"{"cmd":"createDatabase","database":"sales","primaryShard":"shard0001"}"#,
        )
        .unwrap();
        assert_eq!(req.name(), "createDatabase");

        let req: AdminRequest = serde_json::from_str(r#"{"cmd":"ping"}"#).unwrap();
        assert_eq!(req, AdminRequest::Ping);

        assert!(serde_json::from_str::<AdminRequest>(r#"{"cmd":"shardCollection"}"#).is_err());
    }

    #[test]
    pub fn test_error_response_wire_format() {
        let resp = AdminResponse::error(ErrorKind::DatabaseNotFound, "database sales not found");
        let raw = serde_json::to_value(&resp).unwrap();

        assert_eq!(raw["ok"], false);
        assert_eq!(raw["errorKind"], "DatabaseNotFound");
        assert!(raw.get("database").is_none());
        assert!(raw.get("unreachableRouters").is_none());
    }
}
