//! 数据集处理
//!
//! 从 CSV/JSON 文件读取 IMU、磁偏角和坐标变换，按时间顺序回放到总线上。
mod player;
mod recording;

pub use player::Player;

use std::path::PathBuf;

use thiserror::Error;

use crate::global_types::Timestamp;
use crate::msgs::{Float32, Imu, TransformStamped};

pub type DefaultDataset = recording::Recording;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read {path:?}: {err}")]
    Io { path: PathBuf, err: std::io::Error },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait DatasetTrait {
    /// IMU 数据，按文件顺序
    fn imu_samples(&self) -> &[Imu];
    /// 磁偏角及其发布时间
    fn declinations(&self) -> &[(Timestamp, Float32)];
    /// 坐标变换，bool 表示是否为静态变换
    fn transforms(&self) -> &[(bool, TransformStamped)];
}
