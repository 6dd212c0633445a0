use crate::constants::backup;
use crate::{KeeperError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

/// 备份文件对应的校验文件路径：`<artifact>.sha256`
pub fn sidecar_path(artifact: &Path) -> PathBuf {
    let mut raw = artifact.as_os_str().to_owned();
    raw.push(".");
    raw.push(backup::CHECKSUM_EXTENSION);
    PathBuf::from(raw)
}

/// 校验失败原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyFailure {
    NotFound,
    EmptyFile,
    Io(String),
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyFailure::NotFound => f.write_str("文件不存在"),
            VerifyFailure::EmptyFile => f.write_str("文件为空"),
            VerifyFailure::Io(reason) => write!(f, "读取失败: {reason}"),
        }
    }
}

/// `verify` 的结果
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub checksum: Option<String>,
    pub size: Option<u64>,
    pub path: PathBuf,
    pub error: Option<VerifyFailure>,
}

impl VerificationResult {
    fn failed(path: &Path, failure: VerifyFailure) -> Self {
        Self {
            valid: false,
            checksum: None,
            size: None,
            path: path.to_path_buf(),
            error: Some(failure),
        }
    }
}

/// 与已存校验值比对的详细结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredCheck {
    Match,
    Mismatch { expected: String, actual: String },
    MissingSidecar,
    Unreadable(String),
}

impl StoredCheck {
    pub fn is_match(&self) -> bool {
        matches!(self, StoredCheck::Match)
    }
}

impl fmt::Display for StoredCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredCheck::Match => f.write_str("校验通过"),
            StoredCheck::Mismatch { expected, actual } => {
                write!(f, "校验和不匹配 (期望: {expected}, 实际: {actual})")
            }
            StoredCheck::MissingSidecar => f.write_str("缺少校验文件"),
            StoredCheck::Unreadable(reason) => write!(f, "无法读取: {reason}"),
        }
    }
}

/// 完整性校验器
///
/// `verify` 记录校验值（写入校验文件），`verify_against_stored` 只比对不写入，
/// 两者是不同的操作。
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    buffer_size: usize,
}

impl Default for IntegrityVerifier {
    fn default() -> Self {
        Self {
            buffer_size: backup::DIGEST_BUFFER_SIZE,
        }
    }
}

impl IntegrityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 流式计算文件的SHA256（小写十六进制）
    pub async fn digest(&self, path: &Path) -> Result<String> {
        let mut file = File::open(path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                KeeperError::NotFound(path.display().to_string())
            } else {
                KeeperError::Io(e)
            }
        })?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            let bytes_read = file.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        let hash = hasher.finalize();
        Ok(format!("{hash:x}"))
    }

    /// 校验备份并记录校验值
    pub async fn verify(&self, path: &Path) -> VerificationResult {
        info!("校验备份完整性: {}", path.display());

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                error!("备份路径不是文件: {}", path.display());
                return VerificationResult::failed(path, VerifyFailure::NotFound);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                error!("备份文件不存在: {}", path.display());
                return VerificationResult::failed(path, VerifyFailure::NotFound);
            }
            Err(e) => {
                error!(error = %e, "读取备份文件信息失败: {}", path.display());
                return VerificationResult::failed(path, VerifyFailure::Io(e.to_string()));
            }
        };

        if metadata.len() == 0 {
            error!("备份文件为空: {}", path.display());
            return VerificationResult::failed(path, VerifyFailure::EmptyFile);
        }

        let checksum = match self.digest(path).await {
            Ok(checksum) => checksum,
            Err(e) => {
                error!(error = %e, "计算校验和失败: {}", path.display());
                return VerificationResult::failed(path, VerifyFailure::Io(e.to_string()));
            }
        };

        let sidecar = sidecar_path(path);
        if let Err(e) = tokio::fs::write(&sidecar, &checksum).await {
            error!(error = %e, "写入校验文件失败: {}", sidecar.display());
            return VerificationResult::failed(path, VerifyFailure::Io(e.to_string()));
        }

        info!("✅ 备份校验通过: {}", path.display());
        info!("   SHA256: {}", checksum);

        VerificationResult {
            valid: true,
            checksum: Some(checksum),
            size: Some(metadata.len()),
            path: path.to_path_buf(),
            error: None,
        }
    }

    /// 与校验文件中记录的值比对，返回详细结果
    pub async fn check_against_stored(&self, path: &Path) -> StoredCheck {
        let sidecar = sidecar_path(path);

        let stored = match tokio::fs::read_to_string(&sidecar).await {
            Ok(content) => content.trim().to_string(),
            Err(e) if e.kind() == ErrorKind::NotFound => return StoredCheck::MissingSidecar,
            Err(e) => return StoredCheck::Unreadable(e.to_string()),
        };

        match self.digest(path).await {
            Ok(actual) if actual == stored => StoredCheck::Match,
            Ok(actual) => StoredCheck::Mismatch {
                expected: stored,
                actual,
            },
            Err(e) => StoredCheck::Unreadable(e.to_string()),
        }
    }

    /// 与已存校验值比对，不修改任何文件
    pub async fn verify_against_stored(&self, path: &Path) -> bool {
        let check = self.check_against_stored(path).await;

        match &check {
            StoredCheck::Match => info!("✅ 校验和比对通过: {}", path.display()),
            StoredCheck::MissingSidecar => {
                warn!("未找到校验文件: {}", sidecar_path(path).display())
            }
            StoredCheck::Mismatch { expected, actual } => {
                error!("❌ 校验和不匹配: {}", path.display());
                error!("   期望: {}, 实际: {}", expected, actual);
            }
            StoredCheck::Unreadable(reason) => {
                error!("校验和比对失败 {}: {}", path.display(), reason)
            }
        }

        check.is_match()
    }
}
