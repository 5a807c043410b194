use std::path::Path;

use serde::Deserialize;

use super::{DatasetError, DatasetTrait};
use crate::global_types::Timestamp;
use crate::msgs::{Float32, Header, Imu, Quaternion, TransformStamped, Vector3};

/// `timestamp_ns,frame_id,qx,qy,qz,qw,wx,wy,wz,ax,ay,az`
#[derive(Debug, Deserialize)]
struct ImuRecord {
    timestamp_ns: i64,
    frame_id: String,
    qx: f64,
    qy: f64,
    qz: f64,
    qw: f64,
    wx: f64,
    wy: f64,
    wz: f64,
    ax: f64,
    ay: f64,
    az: f64,
}

impl From<ImuRecord> for Imu {
    fn from(record: ImuRecord) -> Self {
        Self {
            header: Header {
                stamp: Timestamp::from_nanos(record.timestamp_ns),
                frame_id: record.frame_id,
            },
            orientation: Quaternion {
                x: record.qx,
                y: record.qy,
                z: record.qz,
                w: record.qw,
            },
            angular_velocity: Vector3::new(record.wx, record.wy, record.wz),
            linear_acceleration: Vector3::new(record.ax, record.ay, record.az),
            ..Default::default()
        }
    }
}

/// `timestamp_ns,declination`
#[derive(Debug, Deserialize)]
struct DeclinationRecord {
    timestamp_ns: i64,
    declination: f32,
}

#[derive(Debug, Deserialize)]
struct TransformRecord {
    #[serde(flatten)]
    transform: TransformStamped,
    #[serde(default, rename = "static")]
    is_static: bool,
}

/// 一次录制的全部输入
#[derive(Debug, Default)]
pub struct Recording {
    pub imu0s: Vec<Imu>,
    pub declinations: Vec<(Timestamp, Float32)>,
    pub transforms: Vec<(bool, TransformStamped)>,
}

impl Recording {
    fn csv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, DatasetError> {
        Ok(csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_path(path)?)
    }

    pub fn read_imu(path: &Path) -> Result<Vec<Imu>, DatasetError> {
        let mut reader = Self::csv_reader(path)?;
        let mut imu0s = vec![];
        for record in reader.deserialize::<ImuRecord>() {
            imu0s.push(record?.into());
        }
        Ok(imu0s)
    }

    pub fn read_declination(path: &Path) -> Result<Vec<(Timestamp, Float32)>, DatasetError> {
        let mut reader = Self::csv_reader(path)?;
        let mut declinations = vec![];
        for record in reader.deserialize::<DeclinationRecord>() {
            let record = record?;
            declinations.push((
                Timestamp::from_nanos(record.timestamp_ns),
                Float32 {
                    data: record.declination,
                },
            ));
        }
        Ok(declinations)
    }

    /// JSON 数组，元素为 TransformStamped 加可选的 `"static": true`
    pub fn read_transforms(path: &Path) -> Result<Vec<(bool, TransformStamped)>, DatasetError> {
        let content = std::fs::read_to_string(path).map_err(|err| DatasetError::Io {
            path: path.to_path_buf(),
            err,
        })?;
        let records: Vec<TransformRecord> = serde_json::from_str(&content)?;
        Ok(records
            .into_iter()
            .map(|record| (record.is_static, record.transform))
            .collect())
    }

    pub fn new(
        imu_path: &Path,
        declination_path: Option<&Path>,
        transforms_path: Option<&Path>,
    ) -> Result<Self, DatasetError> {
        // read imu0
        let imu0s = Self::read_imu(imu_path)?;
        let declinations = match declination_path {
            Some(path) => Self::read_declination(path)?,
            None => vec![],
        };
        let transforms = match transforms_path {
            Some(path) => Self::read_transforms(path)?,
            None => vec![],
        };
        log::info!(
            "loaded {} imu samples, {} declination updates, {} transforms",
            imu0s.len(),
            declinations.len(),
            transforms.len()
        );
        Ok(Self {
            imu0s,
            declinations,
            transforms,
        })
    }
}

impl DatasetTrait for Recording {
    fn imu_samples(&self) -> &[Imu] {
        &self.imu0s
    }

    fn declinations(&self) -> &[(Timestamp, Float32)] {
        &self.declinations
    }

    fn transforms(&self) -> &[(bool, TransformStamped)] {
        &self.transforms
    }
}
