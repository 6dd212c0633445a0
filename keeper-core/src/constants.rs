/// 备份文件相关常量
pub mod backup {
    use std::path::{Path, PathBuf};

    /// 备份目录名
    pub const BACKUP_DIR_NAME: &str = "backups";

    /// 校验文件扩展名（追加在完整文件名之后）
    pub const CHECKSUM_EXTENSION: &str = "sha256";

    /// 被视为备份文件的扩展名
    pub const ARTIFACT_EXTENSIONS: &[&str] = &["backup", "sql", "dump", "gz"];

    /// 明确排除的扩展名（校验文件、日志）
    pub const EXCLUDED_EXTENSIONS: &[&str] = &["sha256", "log"];

    /// 默认保留天数
    pub const DEFAULT_RETENTION_DAYS: u32 = 30;

    /// 默认最多保留的备份数量
    pub const DEFAULT_MAX_BACKUPS: usize = 10;

    /// 未指定数据库名时使用的目标名
    pub const DEFAULT_TARGET_NAME: &str = "default";

    /// 文件名中的时间戳格式（UTC，精确到秒，冒号替换为短横线）
    pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

    /// 计算摘要时的读取缓冲区大小
    pub const DIGEST_BUFFER_SIZE: usize = 64 * 1024;

    /// 获取默认备份存储目录
    pub fn get_default_storage_dir() -> PathBuf {
        Path::new(".").join(BACKUP_DIR_NAME)
    }
}

/// 恢复测试相关常量
pub mod restore_test {
    /// 恢复测试目标库的名称后缀
    pub const DEFAULT_TEST_DB_SUFFIX: &str = "_restore_test";

    /// 默认恢复测试cron表达式（每周日凌晨4点）
    pub const DEFAULT_RESTORE_TEST_CRON: &str = "0 4 * * 0";
}

/// Cron任务相关常量
pub mod cron {
    /// 默认自动备份cron表达式（每天凌晨2点）
    pub const DEFAULT_BACKUP_CRON: &str = "0 2 * * *";

    /// Cron表达式字段数量
    pub const CRON_FIELDS_COUNT: usize = 5;

    /// 带秒字段的Cron表达式字段数量
    pub const CRON_FIELDS_WITH_SECONDS: usize = 6;

    /// 定时触发消息通道容量
    pub const DISPATCH_CHANNEL_CAPACITY: usize = 100;
}

/// 数据库连接默认值
pub mod database {
    pub const DEFAULT_HOST: &str = "localhost";

    pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

    pub const DEFAULT_POSTGRES_USER: &str = "postgres";

    pub const DEFAULT_MYSQL_PORT: u16 = 3306;

    pub const DEFAULT_MYSQL_USER: &str = "root";

    pub const DEFAULT_MONGO_URI: &str = "mongodb://localhost:27017";
}

/// 日志和输出相关常量
pub mod logging {
    use std::path::{Path, PathBuf};

    /// 默认日志级别
    pub const DEFAULT_LOG_LEVEL: &str = "info";

    /// 日志目录名
    pub const LOG_DIR_NAME: &str = "logs";

    /// 全量日志文件名前缀
    pub const COMBINED_LOG_FILE: &str = "combined.log";

    /// 错误日志文件名前缀
    pub const ERROR_LOG_FILE: &str = "error.log";

    /// 获取默认日志目录
    pub fn get_log_dir() -> PathBuf {
        Path::new(".").join(LOG_DIR_NAME)
    }
}

/// 应用配置相关常量
pub mod config {
    /// 配置文件名
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// 按优先级查找的配置文件
    pub const CONFIG_FILE_CANDIDATES: &[&str] = &["config.toml", "keeper.toml", ".keeper.toml"];
}
