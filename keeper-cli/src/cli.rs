use clap::{Parser, Subcommand};
use keeper_core::target::DatabaseKind;
use std::path::PathBuf;

fn parse_kind(value: &str) -> Result<DatabaseKind, String> {
    value.parse().map_err(|e: keeper_core::KeeperError| e.to_string())
}

/// DB Keeper CLI - 数据库定时备份、校验与恢复测试工具
#[derive(Parser, Debug)]
#[command(name = "keeper-cli")]
#[command(version)]
#[command(about = "数据库定时备份、校验与恢复测试工具")]
pub struct Cli {
    /// 配置文件路径（默认依次查找 config.toml、keeper.toml、.keeper.toml）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 首次使用时初始化，创建配置文件和目录
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 立即执行一次备份
    Backup {
        /// 数据库类型: postgres, mysql, mongodb
        #[arg(env = "DB_TYPE", default_value = "postgres", value_parser = parse_kind)]
        kind: DatabaseKind,
    },
    /// 将备份恢复到测试库，验证备份可用
    Restore {
        /// 备份文件，相对路径按备份目录解析
        file: PathBuf,
        /// 数据库类型: postgres, mysql, mongodb
        #[arg(env = "DB_TYPE", default_value = "postgres", value_parser = parse_kind)]
        kind: DatabaseKind,
    },
    /// 根据 .sha256 校验文件检查备份完整性
    Verify {
        /// 备份文件，相对路径按备份目录解析
        file: PathBuf,
    },
    /// 以 JSON 输出编排器状态
    Status,
    /// 列出所有备份（最新在前）
    List,
    /// 按保留策略清理旧备份
    Prune,
    /// 按配置启动定时备份，直到收到 Ctrl-C / SIGTERM
    Daemon,
}
