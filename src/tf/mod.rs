//! 坐标变换
//!
//! [TransformBuffer] 保存带时间戳的坐标变换树，[TransformListener] 从 `tf`/`tf_static`
//! 话题接收变换并在查询时有限等待。

mod buffer;
mod listener;

pub use buffer::TransformBuffer;
pub use listener::TransformListener;

use std::time::Duration;

use nalgebra::{Isometry3, UnitQuaternion, Vector3};
use thiserror::Error;

use crate::global_types::Timestamp;
use crate::utility::Utility;

/// 带时间戳和坐标系的数据
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    pub data: T,
    pub stamp: Timestamp,
    pub frame_id: String,
}

impl<T> Stamped<T> {
    pub fn new(data: T, stamp: Timestamp, frame_id: impl Into<String>) -> Self {
        Self {
            data,
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("frame \"{0}\" does not exist")]
    Lookup(String),

    #[error("could not find a connection between \"{target}\" and \"{source_frame}\" because they are not part of the same tree")]
    Connectivity { target: String, source_frame: String },

    #[error("lookup of \"{frame}\" at {requested} would require extrapolation, data available in [{earliest}, {latest}]")]
    Extrapolation {
        frame: String,
        requested: Timestamp,
        earliest: Timestamp,
        latest: Timestamp,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("timed out after {waited:?}: {cause}")]
    Timeout {
        waited: Duration,
        cause: Box<TransformError>,
    },
}

/// 坐标变换的 trait
pub trait TransformerTrait {
    /// 返回 `stamp` 时刻从 `source_frame` 到 `target_frame` 的变换 T_target_source
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Timestamp,
    ) -> Result<Isometry3<f64>, TransformError>;

    /// 四元数需已归一化
    fn transform_quaternion(
        &self,
        target_frame: &str,
        quat_in: &Stamped<nalgebra::Quaternion<f64>>,
    ) -> Result<Stamped<UnitQuaternion<f64>>, TransformError> {
        if !Utility::is_normalized(&quat_in.data) {
            return Err(TransformError::InvalidArgument(format!(
                "quaternion is not normalized (norm {})",
                quat_in.data.norm()
            )));
        }
        let transform = self.lookup_transform(target_frame, &quat_in.frame_id, quat_in.stamp)?;
        let quat = UnitQuaternion::new_normalize(quat_in.data);
        Ok(Stamped::new(
            transform.rotation * quat,
            quat_in.stamp,
            target_frame,
        ))
    }

    /// 只旋转，不平移
    fn transform_vector(
        &self,
        target_frame: &str,
        vec_in: &Stamped<Vector3<f64>>,
    ) -> Result<Stamped<Vector3<f64>>, TransformError> {
        let transform = self.lookup_transform(target_frame, &vec_in.frame_id, vec_in.stamp)?;
        Ok(Stamped::new(
            transform.rotation * vec_in.data,
            vec_in.stamp,
            target_frame,
        ))
    }
}
