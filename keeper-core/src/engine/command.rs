use super::DumpEngine;
use crate::target::{DatabaseKind, ServerConnection, TargetConfig, UriConnection};
use crate::{KeeperError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// 一次外部命令调用
///
/// 密码只通过环境变量传递，不出现在参数列表中。
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: &'static str,
    pub args: Vec<String>,
    pub envs: Vec<(&'static str, String)>,
    pub stdin: Option<PathBuf>,
}

impl CommandSpec {
    fn new(program: &'static str) -> Self {
        Self {
            program,
            args: Vec::new(),
            envs: Vec::new(),
            stdin: None,
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn env(mut self, key: &'static str, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.envs.push((key, value.to_string()));
        }
        self
    }
}

/// 恢复流程：可选的建库步骤（失败忽略）+ 恢复命令
#[derive(Debug, Clone, PartialEq)]
pub struct RestorePlan {
    pub prepare: Option<CommandSpec>,
    pub restore: CommandSpec,
}

/// 通过子进程调用 pg_dump / mysqldump / mongodump 等工具
#[derive(Debug, Clone, Default)]
pub struct CommandEngine;

fn server_connection(kind: DatabaseKind, config: &TargetConfig) -> Result<&ServerConnection> {
    match config {
        TargetConfig::Server(conn) => Ok(conn),
        TargetConfig::Uri(_) => Err(KeeperError::custom(format!(
            "{kind} 需要 host/port 形式的连接参数"
        ))),
    }
}

fn uri_connection(kind: DatabaseKind, config: &TargetConfig) -> Result<&UriConnection> {
    match config {
        TargetConfig::Uri(conn) => Ok(conn),
        TargetConfig::Server(_) => Err(KeeperError::custom(format!(
            "{kind} 需要 uri 形式的连接参数"
        ))),
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl CommandEngine {
    pub fn new() -> Self {
        Self
    }

    /// 构建备份命令
    pub fn backup_command(
        kind: DatabaseKind,
        config: &TargetConfig,
        output: &Path,
    ) -> Result<CommandSpec> {
        let spec = match kind {
            DatabaseKind::Postgres => {
                let conn = server_connection(kind, config)?;
                let spec = CommandSpec::new("pg_dump")
                    .arg("-h")
                    .arg(&conn.host)
                    .arg("-p")
                    .arg(conn.port.to_string())
                    .arg("-U")
                    .arg(&conn.user)
                    .arg("-F")
                    .arg("c")
                    .arg("-b")
                    .arg("-v")
                    .arg("-f")
                    .arg(path_arg(output))
                    .env("PGPASSWORD", conn.password.as_deref());
                match conn.database.as_deref() {
                    Some(database) => spec.arg(database),
                    None => spec,
                }
            }
            DatabaseKind::Mysql => {
                let conn = server_connection(kind, config)?;
                let spec = CommandSpec::new("mysqldump")
                    .arg("-h")
                    .arg(&conn.host)
                    .arg("-P")
                    .arg(conn.port.to_string())
                    .arg("-u")
                    .arg(&conn.user)
                    .arg("--single-transaction")
                    .arg("--routines")
                    .arg("--triggers")
                    .arg(format!("--result-file={}", path_arg(output)))
                    .env("MYSQL_PWD", conn.password.as_deref());
                match conn.database.as_deref() {
                    Some(database) => spec.arg(database),
                    None => spec.arg("--all-databases"),
                }
            }
            DatabaseKind::Mongodb => {
                let conn = uri_connection(kind, config)?;
                let spec = CommandSpec::new("mongodump")
                    .arg(format!("--uri={}", conn.uri))
                    .arg(format!("--archive={}", path_arg(output)))
                    .arg("--gzip");
                match conn.database.as_deref() {
                    Some(database) => spec.arg(format!("--db={database}")),
                    None => spec,
                }
            }
        };

        Ok(spec)
    }

    /// 构建恢复流程，恢复目标始终是 `target_name` 而不是原库
    pub fn restore_plan(
        kind: DatabaseKind,
        artifact: &Path,
        config: &TargetConfig,
        target_name: &str,
    ) -> Result<RestorePlan> {
        let plan = match kind {
            DatabaseKind::Postgres => {
                let conn = server_connection(kind, config)?;
                let prepare = CommandSpec::new("createdb")
                    .arg("-h")
                    .arg(&conn.host)
                    .arg("-p")
                    .arg(conn.port.to_string())
                    .arg("-U")
                    .arg(&conn.user)
                    .arg(target_name)
                    .env("PGPASSWORD", conn.password.as_deref());
                let restore = CommandSpec::new("pg_restore")
                    .arg("-h")
                    .arg(&conn.host)
                    .arg("-p")
                    .arg(conn.port.to_string())
                    .arg("-U")
                    .arg(&conn.user)
                    .arg("-d")
                    .arg(target_name)
                    .arg("-v")
                    .arg(path_arg(artifact))
                    .env("PGPASSWORD", conn.password.as_deref());
                RestorePlan {
                    prepare: Some(prepare),
                    restore,
                }
            }
            DatabaseKind::Mysql => {
                let conn = server_connection(kind, config)?;
                let base = CommandSpec::new("mysql")
                    .arg("-h")
                    .arg(&conn.host)
                    .arg("-P")
                    .arg(conn.port.to_string())
                    .arg("-u")
                    .arg(&conn.user)
                    .env("MYSQL_PWD", conn.password.as_deref());
                let prepare = base
                    .clone()
                    .arg("-e")
                    .arg(format!("CREATE DATABASE IF NOT EXISTS `{target_name}`"));
                let mut restore = base.arg(target_name);
                restore.stdin = Some(artifact.to_path_buf());
                RestorePlan {
                    prepare: Some(prepare),
                    restore,
                }
            }
            DatabaseKind::Mongodb => {
                let conn = uri_connection(kind, config)?;
                let source = conn.database.as_deref().ok_or_else(|| {
                    KeeperError::custom("MongoDB 恢复测试需要配置 database 以便重命名命名空间")
                })?;
                let restore = CommandSpec::new("mongorestore")
                    .arg(format!("--uri={}", conn.uri))
                    .arg(format!("--archive={}", path_arg(artifact)))
                    .arg("--gzip")
                    .arg(format!("--nsFrom={source}.*"))
                    .arg(format!("--nsTo={target_name}.*"));
                RestorePlan {
                    prepare: None,
                    restore,
                }
            }
        };

        Ok(plan)
    }

    /// 执行外部命令
    async fn run(&self, spec: &CommandSpec) -> Result<std::process::Output> {
        if which::which(spec.program).is_err() {
            return Err(KeeperError::external_tool(format!(
                "{} 未安装或不在 PATH 中",
                spec.program
            )));
        }

        let mut command = Command::new(spec.program);
        command
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(key, value)| (*key, value.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match &spec.stdin {
            Some(input) => {
                let file = std::fs::File::open(input)?;
                command.stdin(Stdio::from(file));
            }
            None => {
                command.stdin(Stdio::null());
            }
        }

        debug!(program = spec.program, "执行外部命令");
        Ok(command.output().await?)
    }

    /// 执行外部命令，非零退出码视为失败
    async fn run_checked(&self, spec: &CommandSpec) -> Result<()> {
        let output = self.run(spec).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(KeeperError::external_tool(format!(
                "{} 执行失败 ({}): {}",
                spec.program,
                output.status,
                stderr.trim()
            )));
        }

        if !stderr.trim().is_empty() {
            debug!("{} 输出: {}", spec.program, stderr.trim());
        }
        Ok(())
    }
}

impl DumpEngine for CommandEngine {
    async fn backup(&self, kind: DatabaseKind, config: &TargetConfig, output: &Path) -> Result<()> {
        let spec = Self::backup_command(kind, config, output)?;

        info!("开始 {} 备份: {}", kind, config.target_name());
        self.run_checked(&spec).await?;
        info!("{} 备份完成: {}", kind, output.display());

        Ok(())
    }

    async fn restore(
        &self,
        kind: DatabaseKind,
        artifact: &Path,
        config: &TargetConfig,
        target_name: &str,
    ) -> Result<()> {
        let plan = Self::restore_plan(kind, artifact, config, target_name)?;

        info!("恢复 {} 备份到: {}", kind, target_name);
        if let Some(prepare) = &plan.prepare {
            // 目标库可能已存在
            if let Err(e) = self.run_checked(prepare).await {
                debug!("建库步骤: {}", e);
            }
        }

        self.run_checked(&plan.restore).await?;
        info!("{} 恢复完成: {}", kind, target_name);

        Ok(())
    }
}
