use thiserror::Error;

pub type Result<T> = std::result::Result<T, KeeperError>;

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("cron 表达式无效: {0}")]
    Cron(#[from] croner::errors::CronError),

    #[error("文件不存在: {0}")]
    NotFound(String),

    #[error("备份文件为空: {0}")]
    EmptyArtifact(String),

    #[error("校验和不匹配: {0}")]
    ChecksumMismatch(String),

    #[error("外部工具执行失败: {0}")]
    ExternalTool(String),

    #[error("文件系统错误: {0}")]
    Filesystem(String),

    #[error("备份校验失败")]
    VerificationFailed,

    #[error("恢复前完整性校验失败: {0}")]
    IntegrityCheckFailed(String),

    #[error("不支持的数据库类型: {0}")]
    UnsupportedKind(String),

    #[error("配置文件未找到")]
    ConfigNotFound,

    #[error("自定义错误: {0}")]
    Custom(String),
}

impl KeeperError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn external_tool(msg: impl Into<String>) -> Self {
        Self::ExternalTool(msg.into())
    }

    pub fn filesystem(msg: impl Into<String>) -> Self {
        Self::Filesystem(msg.into())
    }
}
