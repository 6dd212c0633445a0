use super::types::{JobId, JobType};
use crate::target::BackupTarget;

/// 一个任务每次触发要执行的工作，随消息按值传递
#[derive(Debug, Clone)]
pub struct JobWork {
    pub target: BackupTarget,
    pub job_type: JobType,
}

/// 定时器发往分发器的消息
#[derive(Debug)]
pub enum JobMessage {
    /// 任务到点触发
    Fire { job_id: JobId, work: JobWork },
}
