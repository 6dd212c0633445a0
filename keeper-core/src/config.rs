use crate::constants::{backup, config, cron, logging, restore_test};
use crate::error::{KeeperError, Result};
use crate::orchestrator::{OrchestratorPolicy, OverlapPolicy, RestoreTestPolicy};
use crate::retention::RetentionPolicy;
use crate::target::{BackupTarget, DatabaseKind, ServerConnection, TargetConfig, UriConnection};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub databases: DatabasesConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub restore_test: RestoreTestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 数据库连接配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DatabasesConfig {
    #[serde(default = "ServerConnection::postgres_default")]
    pub postgres: ServerConnection,
    #[serde(default = "ServerConnection::mysql_default")]
    pub mysql: ServerConnection,
    #[serde(default)]
    pub mongodb: UriConnection,
}

impl Default for DatabasesConfig {
    fn default() -> Self {
        Self {
            postgres: ServerConnection::postgres_default(),
            mysql: ServerConnection::mysql_default(),
            mongodb: UriConnection::default(),
        }
    }
}

/// 备份相关配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BackupConfig {
    pub dir: String,
    pub schedule: String,
    pub retention_days: u32,
    pub max_backups: usize,
    pub verify: bool,
    pub overlap: OverlapPolicy,
    pub targets: Vec<DatabaseKind>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: backup::get_default_storage_dir()
                .to_string_lossy()
                .to_string(),
            schedule: cron::DEFAULT_BACKUP_CRON.to_string(),
            retention_days: backup::DEFAULT_RETENTION_DAYS,
            max_backups: backup::DEFAULT_MAX_BACKUPS,
            verify: false,
            overlap: OverlapPolicy::default(),
            targets: vec![DatabaseKind::Postgres],
        }
    }
}

/// 恢复测试配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RestoreTestConfig {
    pub enabled: bool,
    pub schedule: String,
    pub test_db_suffix: String,
}

impl Default for RestoreTestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: restore_test::DEFAULT_RESTORE_TEST_CRON.to_string(),
            test_db_suffix: restore_test::DEFAULT_TEST_DB_SUFFIX.to_string(),
        }
    }
}

/// 日志配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// 未配置时只输出到终端
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: logging::DEFAULT_LOG_LEVEL.to_string(),
            dir: Some(logging::get_log_dir().to_string_lossy().to_string()),
        }
    }
}

fn toml_str(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

fn optional_line(key: &str, value: Option<&str>, example: &str) -> String {
    match value {
        Some(value) => format!("{key} = {}", toml_str(value)),
        None => format!("# {key} = {}", toml_str(example)),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// 读取并解析环境变量，无法解析时忽略
fn parse_env<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("环境变量 {} 的值无效，已忽略: {}", key, raw);
            None
        }
    }
}

fn env_bool<F>(lookup: &F, key: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    let value = parse_bool(&raw);
    if value.is_none() {
        warn!("环境变量 {} 的值无效，已忽略: {}", key, raw);
    }
    value
}

fn apply_server_env<F>(conn: &mut ServerConnection, lookup: &F, prefix: &str, database_key: &str)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup(&format!("{prefix}_HOST")).and_then(non_empty) {
        conn.host = host;
    }
    if let Some(port) = parse_env(lookup, &format!("{prefix}_PORT")) {
        conn.port = port;
    }
    if let Some(user) = lookup(&format!("{prefix}_USER")).and_then(non_empty) {
        conn.user = user;
    }
    if let Some(password) = lookup(&format!("{prefix}_PASSWORD")) {
        conn.password = Some(password);
    }
    if let Some(database) = lookup(database_key) {
        conn.database = non_empty(database);
    }
}

impl AppConfig {
    /// 加载配置：显式路径优先，否则按约定文件名查找；随后应用环境变量覆盖
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(KeeperError::ConfigNotFound);
                }
                Self::load_from_file(path)?
            }
            None => Self::find_and_load_config()?,
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// 智能查找并加载配置文件
    /// 按优先级查找：config.toml -> keeper.toml -> .keeper.toml
    pub fn find_and_load_config() -> Result<Self> {
        for config_file in config::CONFIG_FILE_CANDIDATES {
            if Path::new(config_file).exists() {
                info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        Err(KeeperError::ConfigNotFound)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_with_comments();
        fs::write(&path, content)?;
        Ok(())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> String {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        let postgres = &self.databases.postgres;
        let mysql = &self.databases.mysql;
        let mongodb = &self.databases.mongodb;
        let targets = toml::Value::Array(
            self.backup
                .targets
                .iter()
                .map(|kind| toml::Value::String(kind.to_string()))
                .collect(),
        );
        let overlap = match self.backup.overlap {
            OverlapPolicy::Allow => "allow",
            OverlapPolicy::Skip => "skip",
        };

        TEMPLATE
            .replace("{postgres_host}", &toml_str(&postgres.host))
            .replace("{postgres_port}", &postgres.port.to_string())
            .replace("{postgres_user}", &toml_str(&postgres.user))
            .replace(
                "{postgres_database}",
                &optional_line("database", postgres.database.as_deref(), "mydb"),
            )
            .replace("{mysql_host}", &toml_str(&mysql.host))
            .replace("{mysql_port}", &mysql.port.to_string())
            .replace("{mysql_user}", &toml_str(&mysql.user))
            .replace(
                "{mysql_database}",
                &optional_line("database", mysql.database.as_deref(), "mydb"),
            )
            .replace("{mongo_uri}", &toml_str(&mongodb.uri))
            .replace(
                "{mongo_database}",
                &optional_line("database", mongodb.database.as_deref(), "mydb"),
            )
            .replace("{backup_dir}", &toml_str(&self.backup.dir))
            .replace("{backup_schedule}", &toml_str(&self.backup.schedule))
            .replace("{retention_days}", &self.backup.retention_days.to_string())
            .replace("{max_backups}", &self.backup.max_backups.to_string())
            .replace("{verify}", &self.backup.verify.to_string())
            .replace("{overlap}", &toml_str(overlap))
            .replace("{targets}", &targets.to_string())
            .replace(
                "{restore_test_enabled}",
                &self.restore_test.enabled.to_string(),
            )
            .replace(
                "{restore_test_schedule}",
                &toml_str(&self.restore_test.schedule),
            )
            .replace("{test_db_suffix}", &toml_str(&self.restore_test.test_db_suffix))
            .replace("{log_level}", &toml_str(&self.logging.level))
            .replace(
                "{log_dir}",
                &optional_line("dir", self.logging.dir.as_deref(), "./logs"),
            )
    }

    /// 应用环境变量覆盖，`lookup` 通常为 `std::env::var`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        apply_server_env(&mut self.databases.postgres, &lookup, "DB", "DB_NAME");
        apply_server_env(&mut self.databases.mysql, &lookup, "MYSQL", "MYSQL_DB");

        if let Some(uri) = lookup("MONGO_URI").and_then(non_empty) {
            self.databases.mongodb.uri = uri;
        }
        if let Some(database) = lookup("MONGO_DB") {
            self.databases.mongodb.database = non_empty(database);
        }

        if let Some(dir) = lookup("BACKUP_DIR").and_then(non_empty) {
            self.backup.dir = dir;
        }
        if let Some(schedule) = lookup("BACKUP_SCHEDULE").and_then(non_empty) {
            self.backup.schedule = schedule;
        }
        if let Some(days) = parse_env(&lookup, "RETENTION_DAYS") {
            self.backup.retention_days = days;
        }
        if let Some(max) = parse_env(&lookup, "MAX_BACKUPS") {
            self.backup.max_backups = max;
        }
        if let Some(verify) = env_bool(&lookup, "VERIFY_BACKUPS") {
            self.backup.verify = verify;
        }
        if let Some(overlap) = parse_env(&lookup, "BACKUP_OVERLAP") {
            self.backup.overlap = overlap;
        }
        if let Some(raw) = lookup("BACKUP_TARGETS") {
            let parsed: Result<Vec<DatabaseKind>> = raw
                .split(',')
                .filter(|item| !item.trim().is_empty())
                .map(DatabaseKind::from_str)
                .collect();
            match parsed {
                Ok(targets) if !targets.is_empty() => self.backup.targets = targets,
                _ => warn!("环境变量 BACKUP_TARGETS 的值无效，已忽略: {}", raw),
            }
        }

        if let Some(enabled) = env_bool(&lookup, "AUTO_RESTORE_TEST") {
            self.restore_test.enabled = enabled;
        }
        if let Some(schedule) = lookup("RESTORE_TEST_SCHEDULE").and_then(non_empty) {
            self.restore_test.schedule = schedule;
        }

        if let Some(level) = lookup("LOG_LEVEL").and_then(non_empty) {
            self.logging.level = level;
        }
        if let Some(dir) = lookup("LOG_DIR").and_then(non_empty) {
            self.logging.dir = Some(dir);
        }
    }

    /// 指定数据库类型的备份目标
    pub fn target_for(&self, kind: DatabaseKind) -> BackupTarget {
        let config = match kind {
            DatabaseKind::Postgres => TargetConfig::Server(self.databases.postgres.clone()),
            DatabaseKind::Mysql => TargetConfig::Server(self.databases.mysql.clone()),
            DatabaseKind::Mongodb => TargetConfig::Uri(self.databases.mongodb.clone()),
        };
        BackupTarget::new(kind, config)
    }

    /// daemon 模式下需要定时备份的目标（去重，保持配置顺序）
    pub fn enabled_targets(&self) -> Vec<BackupTarget> {
        let mut kinds: Vec<DatabaseKind> = Vec::new();
        for kind in &self.backup.targets {
            if !kinds.contains(kind) {
                kinds.push(*kind);
            }
        }
        kinds.into_iter().map(|kind| self.target_for(kind)).collect()
    }

    pub fn orchestrator_policy(&self) -> OrchestratorPolicy {
        OrchestratorPolicy {
            backup_dir: self.get_backup_dir(),
            verify: self.backup.verify,
            retention: RetentionPolicy {
                retention_days: self.backup.retention_days,
                max_count: self.backup.max_backups,
            },
            default_schedule: self.backup.schedule.clone(),
            restore_test: RestoreTestPolicy {
                enabled: self.restore_test.enabled,
                schedule: self.restore_test.schedule.clone(),
                test_db_suffix: self.restore_test.test_db_suffix.clone(),
            },
            overlap: self.backup.overlap,
        }
    }

    /// 获取备份目录
    pub fn get_backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup.dir)
    }

    /// 获取日志目录，未配置时返回 `None`
    pub fn get_log_dir(&self) -> Option<PathBuf> {
        self.logging.dir.as_ref().map(PathBuf::from)
    }

    /// 确保备份和日志目录存在
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.get_backup_dir())?;
        if let Some(log_dir) = self.get_log_dir() {
            fs::create_dir_all(log_dir)?;
        }
        Ok(())
    }
}
