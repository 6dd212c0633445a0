// 外部备份/恢复能力
//
// 编排器只关心 "给定目标和输出路径，生成一个文件，成功或失败"，
// 不检查备份文件内部格式。CommandEngine 通过调用各数据库自带的
// 导出/导入工具实现这一能力。

mod command;

pub use command::{CommandEngine, CommandSpec, RestorePlan};

use crate::Result;
use crate::target::{DatabaseKind, TargetConfig};
use std::path::Path;

/// 备份/恢复能力
pub trait DumpEngine: Send + Sync + 'static {
    /// 将目标数据库导出到 `output`
    fn backup(
        &self,
        kind: DatabaseKind,
        config: &TargetConfig,
        output: &Path,
    ) -> impl Future<Output = Result<()>> + Send;

    /// 将 `artifact` 恢复到名为 `target_name` 的数据库
    fn restore(
        &self,
        kind: DatabaseKind,
        artifact: &Path,
        config: &TargetConfig,
        target_name: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}
