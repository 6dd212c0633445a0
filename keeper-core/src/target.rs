use crate::constants::{backup, database};
use crate::{KeeperError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 支持的数据库类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgres,
    Mysql,
    Mongodb,
}

impl DatabaseKind {
    pub const ALL: [DatabaseKind; 3] = [
        DatabaseKind::Postgres,
        DatabaseKind::Mysql,
        DatabaseKind::Mongodb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Mongodb => "mongodb",
        }
    }

    /// 备份文件扩展名
    pub fn extension(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "backup",
            DatabaseKind::Mysql => "sql",
            DatabaseKind::Mongodb => "dump",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseKind {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(DatabaseKind::Postgres),
            "mysql" => Ok(DatabaseKind::Mysql),
            "mongodb" => Ok(DatabaseKind::Mongodb),
            other => Err(KeeperError::UnsupportedKind(other.to_string())),
        }
    }
}

/// 主机/端口形式的连接参数（PostgreSQL、MySQL）
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

impl ServerConnection {
    pub fn postgres_default() -> Self {
        Self {
            host: database::DEFAULT_HOST.to_string(),
            port: database::DEFAULT_POSTGRES_PORT,
            user: database::DEFAULT_POSTGRES_USER.to_string(),
            password: None,
            database: None,
        }
    }

    pub fn mysql_default() -> Self {
        Self {
            host: database::DEFAULT_HOST.to_string(),
            port: database::DEFAULT_MYSQL_PORT,
            user: database::DEFAULT_MYSQL_USER.to_string(),
            password: None,
            database: None,
        }
    }
}

// 密码不进日志
impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .finish()
    }
}

/// URI形式的连接参数（MongoDB）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UriConnection {
    pub uri: String,
    #[serde(default)]
    pub database: Option<String>,
}

impl Default for UriConnection {
    fn default() -> Self {
        Self {
            uri: database::DEFAULT_MONGO_URI.to_string(),
            database: None,
        }
    }
}

/// 备份目标的连接配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetConfig {
    Server(ServerConnection),
    Uri(UriConnection),
}

impl TargetConfig {
    pub fn database(&self) -> Option<&str> {
        match self {
            TargetConfig::Server(conn) => conn.database.as_deref(),
            TargetConfig::Uri(conn) => conn.database.as_deref(),
        }
    }

    /// 用于文件命名的目标名，未配置数据库名时为 "default"
    pub fn target_name(&self) -> &str {
        self.database()
            .filter(|name| !name.is_empty())
            .unwrap_or(backup::DEFAULT_TARGET_NAME)
    }
}

/// 一个逻辑备份源：数据库类型 + 连接参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupTarget {
    pub kind: DatabaseKind,
    pub config: TargetConfig,
}

impl BackupTarget {
    pub fn new(kind: DatabaseKind, config: TargetConfig) -> Self {
        Self { kind, config }
    }

    pub fn target_name(&self) -> &str {
        self.config.target_name()
    }

    /// 该目标生成的备份文件名前缀，如 `postgres_mydb_`
    pub fn artifact_prefix(&self) -> String {
        format!("{}_{}_", self.kind, self.target_name())
    }

    /// 文件名是否为该目标生成的备份
    ///
    /// 前缀之后必须恰好是 `<时间戳>.<ext>`，因此 `orders` 不会认领 `orders_archive` 的备份。
    pub fn owns_artifact(&self, name: &str) -> bool {
        let extension = format!(".{}", self.kind.extension());
        name.strip_prefix(&self.artifact_prefix())
            .and_then(|rest| rest.strip_suffix(&extension))
            .is_some_and(|stamp| {
                NaiveDateTime::parse_from_str(stamp, backup::FILENAME_TIMESTAMP_FORMAT).is_ok()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "postgres".parse::<DatabaseKind>().unwrap(),
            DatabaseKind::Postgres
        );
        assert_eq!(" MySQL ".parse::<DatabaseKind>().unwrap(), DatabaseKind::Mysql);
        assert!(matches!(
            "oracle".parse::<DatabaseKind>(),
            Err(KeeperError::UnsupportedKind(_))
        ));
    }

    #[test]
    fn test_target_name_falls_back_to_default() {
        let mut conn = ServerConnection::postgres_default();
        assert_eq!(TargetConfig::Server(conn.clone()).target_name(), "default");

        conn.database = Some("orders".to_string());
        let target = BackupTarget::new(DatabaseKind::Postgres, TargetConfig::Server(conn));
        assert_eq!(target.target_name(), "orders");
        assert_eq!(target.artifact_prefix(), "postgres_orders_");
    }

    #[test]
    fn test_owns_artifact_requires_exact_timestamp() {
        let named = |database: &str| {
            BackupTarget::new(
                DatabaseKind::Postgres,
                TargetConfig::Server(ServerConnection {
                    database: Some(database.to_string()),
                    ..ServerConnection::postgres_default()
                }),
            )
        };
        let orders = named("orders");
        let archive = named("orders_archive");

        assert!(orders.owns_artifact("postgres_orders_2024-01-01T02-00-00.backup"));
        assert!(!orders.owns_artifact("postgres_orders_archive_2024-01-02T02-00-00.backup"));
        assert!(archive.owns_artifact("postgres_orders_archive_2024-01-02T02-00-00.backup"));
        assert!(!archive.owns_artifact("postgres_orders_2024-01-01T02-00-00.backup"));

        assert!(!orders.owns_artifact("postgres_orders_2024-01-01T02-00-00.sql"));
        assert!(!orders.owns_artifact("postgres_orders_2024-01-01T02-00-00.backup.sha256"));
        assert!(!orders.owns_artifact("postgres_orders_latest.backup"));
        assert!(!orders.owns_artifact("mysql_orders_2024-01-01T02-00-00.backup"));
    }

    #[test]
    fn test_debug_hides_password() {
        let mut conn = ServerConnection::mysql_default();
        conn.password = Some("s3cret".to_string());
        let rendered = format!("{conn:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("***"));
    }
}
