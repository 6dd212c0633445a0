use super::messages::{JobMessage, JobWork};
use super::types::{JobId, JobRuntime, OverlapPolicy};
use super::workflow::Pipeline;
use crate::constants::cron::{CRON_FIELDS_COUNT, CRON_FIELDS_WITH_SECONDS};
use crate::engine::DumpEngine;
use crate::{KeeperError, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use croner::Cron;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 解析cron表达式，接受标准5字段或带秒的6字段
pub fn parse_schedule(expr: &str) -> Result<Cron> {
    let fields = expr.split_whitespace().count();
    if fields != CRON_FIELDS_COUNT && fields != CRON_FIELDS_WITH_SECONDS {
        return Err(KeeperError::custom(format!(
            "cron 表达式应为 {CRON_FIELDS_COUNT} 或 {CRON_FIELDS_WITH_SECONDS} 个字段，实际 {fields} 个: {expr}"
        )));
    }

    Ok(Cron::new(expr.trim()).with_seconds_optional().parse()?)
}

/// 一次触发之后下一轮计算的起点
///
/// 定时器被延迟（主机挂起、运行时阻塞、时钟跳变）时，错过的触发点直接跳过，
/// 不会补发。第二个返回值表示是否跳过了触发点。
fn resume_point<Tz: TimeZone>(
    cron: &Cron,
    fired: &DateTime<Tz>,
    now: &DateTime<Tz>,
) -> (DateTime<Tz>, bool) {
    if now <= fired {
        return (fired.clone(), false);
    }

    let missed = matches!(
        cron.find_next_occurrence(fired, false),
        Ok(following) if following <= *now
    );
    (now.clone(), missed)
}

/// 启动任务定时器：计算下一次触发时间，睡眠到点后发送触发消息
///
/// 按本地时区计算触发时间。通道关闭后定时器自行退出。
pub(crate) fn spawn_timer(
    job_id: JobId,
    cron: Cron,
    work: JobWork,
    sender: mpsc::Sender<JobMessage>,
    runtime: Arc<DashMap<JobId, JobRuntime>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut cursor = Local::now();

        loop {
            let next = match cron.find_next_occurrence(&cursor, false) {
                Ok(next) => next,
                Err(e) => {
                    error!(job = %job_id, error = %e, "无法计算下一次触发时间，定时器停止");
                    break;
                }
            };

            if let Some(mut state) = runtime.get_mut(&job_id) {
                state.next_run_at = Some(next.with_timezone(&Utc));
            }

            let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(job = %job_id, "下一次触发: {}", next);
            tokio::time::sleep(wait).await;

            let (resume, missed) = resume_point(&cron, &next, &Local::now());
            if missed {
                warn!(job = %job_id, "定时器延迟，跳过 {} 之后错过的触发点", next);
            }
            cursor = resume;

            let message = JobMessage::Fire {
                job_id,
                work: work.clone(),
            };
            if sender.send(message).await.is_err() {
                debug!(job = %job_id, "分发通道已关闭，定时器退出");
                break;
            }
        }
    })
}

/// 任务分发器 - 消费触发消息，每次触发作为独立任务执行
pub(crate) struct JobDispatcher<E> {
    pipeline: Arc<Pipeline<E>>,
    runtime: Arc<DashMap<JobId, JobRuntime>>,
    overlap: OverlapPolicy,
}

impl<E: DumpEngine> JobDispatcher<E> {
    pub fn new(
        pipeline: Arc<Pipeline<E>>,
        runtime: Arc<DashMap<JobId, JobRuntime>>,
        overlap: OverlapPolicy,
    ) -> Self {
        Self {
            pipeline,
            runtime,
            overlap,
        }
    }

    /// 运行分发循环
    pub async fn run(self, mut receiver: mpsc::Receiver<JobMessage>) {
        info!("任务分发器已启动");

        while let Some(message) = receiver.recv().await {
            self.handle_message(message);
        }

        info!("任务分发器已关闭");
    }

    fn handle_message(&self, message: JobMessage) {
        match message {
            JobMessage::Fire { job_id, work } => {
                {
                    let Some(mut state) = self.runtime.get_mut(&job_id) else {
                        debug!(job = %job_id, "任务已注销，忽略触发");
                        return;
                    };

                    if self.overlap == OverlapPolicy::Skip && state.active > 0 {
                        warn!(job = %job_id, "上一次执行尚未结束，跳过本次触发");
                        return;
                    }
                    state.begin();
                }

                let pipeline = self.pipeline.clone();
                let runtime = self.runtime.clone();
                tokio::spawn(async move {
                    let result = pipeline.run_job(&work).await;
                    if let Some(mut state) = runtime.get_mut(&job_id) {
                        state.finish(&result);
                    }
                });
            }
        }
    }
}
