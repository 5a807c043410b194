//! 保存 `data_decl`
//!
//! 每行一个 JSON 对象，附带由姿态计算出的 yaw 便于检查磁偏角。

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

use crate::msgs::Imu;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuSave {
    pub timestamp: i64,
    pub frame_id: String,
    /// x, y, z, w
    pub orientation: [f64; 4],
    /// 弧度
    pub yaw: f64,
    pub angular_velocity: [f64; 3],
    pub linear_acceleration: [f64; 3],
}

impl From<&Imu> for ImuSave {
    fn from(imu: &Imu) -> Self {
        let q = &imu.orientation;
        let orientation = UnitQuaternion::new_normalize(nalgebra::Quaternion::from(q));
        let (_, _, yaw) = orientation.euler_angles();
        let w = &imu.angular_velocity;
        let a = &imu.linear_acceleration;
        Self {
            timestamp: imu.header.stamp.as_nanos(),
            frame_id: imu.header.frame_id.clone(),
            orientation: [q.x, q.y, q.z, q.w],
            yaw,
            angular_velocity: [w.x, w.y, w.z],
            linear_acceleration: [a.x, a.y, a.z],
        }
    }
}

pub struct ImuWriter {
    writer: BufWriter<Box<dyn Write + Send>>,
    count: usize,
}

impl ImuWriter {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: BufWriter::new(writer),
            count: 0,
        }
    }

    /// `path` 为空时写到 stdout
    pub fn create(path: Option<&Path>) -> anyhow::Result<Self> {
        let writer: Box<dyn Write + Send> = match path {
            Some(path) => Box::new(
                File::create(path).with_context(|| format!("failed to create {:?}", path))?,
            ),
            None => Box::new(std::io::stdout()),
        };
        Ok(Self::new(writer))
    }

    pub fn write(&mut self, imu: &Imu) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, &ImuSave::from(imu))?;
        self.writer.write_all(b"\n")?;
        self.count += 1;
        Ok(())
    }

    /// 刷新并返回写入的条数
    pub fn finish(mut self) -> anyhow::Result<usize> {
        self.writer.flush()?;
        Ok(self.count)
    }
}
