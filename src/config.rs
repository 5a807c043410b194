//! 节点参数
//!
//! 参数来源依次为：默认值、JSON 参数文件（第一个位置参数）、命令行私有参数 `_name:=value`。
//! 不以 `_` 开头的 `from:=to` 为话题重映射。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NODE_NAME: &str = "apply_declination_to_imu";

pub const IMU_TOPIC: &str = "data";
pub const DECLINATION_TOPIC: &str = "declination";
pub const IMU_DECL_TOPIC: &str = "data_decl";
pub const TF_TOPIC: &str = "tf";
pub const TF_STATIC_TOPIC: &str = "tf_static";

/// 订阅与发布的队列长度
pub const QUEUE_SIZE: usize = 5;
pub const TF_QUEUE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read parameter file {path:?}: {err}")]
    Io { path: PathBuf, err: std::io::Error },

    #[error("failed to parse parameter file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown parameter `{0}`")]
    UnknownParam(String),

    #[error("invalid value `{value}` for parameter `{name}`")]
    InvalidValue { name: String, value: String },

    #[error("unexpected argument `{0}`")]
    UnexpectedArg(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Params {
    /// 目标坐标系
    pub tf_link: String,
    /// 初始磁偏角（弧度），收到第一条 `declination` 之前使用
    #[serde(rename = "default")]
    pub default_declination: f64,
    /// 等待坐标变换的最长时间（秒）
    pub transform_timeout: f64,
    /// 坐标变换缓存时长（秒）
    pub cache_time: f64,

    // replay
    pub imu_csv: Option<PathBuf>,
    pub declination_csv: Option<PathBuf>,
    pub transforms_json: Option<PathBuf>,
    /// 为空时输出到 stdout
    pub output: Option<PathBuf>,

    #[serde(skip)]
    pub remappings: HashMap<String, String>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            tf_link: "base_link".to_string(),
            default_declination: 0.0,
            transform_timeout: 0.1,
            cache_time: 10.0,
            imu_csv: None,
            declination_csv: None,
            transforms_json: None,
            output: None,
            remappings: HashMap::new(),
        }
    }
}

impl Params {
    pub fn read_from_json(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            err,
        })?;
        let params: Self = serde_json::from_str(&content)?;
        params.validate()?;
        Ok(params)
    }

    /// 解析命令行参数（不含程序名）
    pub fn from_args<I>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut file = None;
        let mut assignments = vec![];
        for arg in args {
            match arg.split_once(":=") {
                Some((name, value)) => assignments.push((name.to_string(), value.to_string())),
                None if file.is_none() => file = Some(PathBuf::from(arg)),
                None => return Err(ConfigError::UnexpectedArg(arg)),
            }
        }

        let mut params = match file {
            Some(path) => Self::read_from_json(&path)?,
            None => Self::default(),
        };
        for (name, value) in assignments {
            match name.strip_prefix('_') {
                Some(param) => params.set(param, &value)?,
                None => {
                    params.remappings.insert(name, value);
                }
            }
        }
        params.validate()?;
        Ok(params)
    }

    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        };
        match name {
            "tf_link" => self.tf_link = value.to_string(),
            "default" => self.default_declination = value.parse().map_err(|_| invalid())?,
            "transform_timeout" => self.transform_timeout = value.parse().map_err(|_| invalid())?,
            "cache_time" => self.cache_time = value.parse().map_err(|_| invalid())?,
            "imu_csv" => self.imu_csv = Some(PathBuf::from(value)),
            "declination_csv" => self.declination_csv = Some(PathBuf::from(value)),
            "transforms_json" => self.transforms_json = Some(PathBuf::from(value)),
            "output" => self.output = Some(PathBuf::from(value)),
            _ => return Err(ConfigError::UnknownParam(name.to_string())),
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &str, value: String| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        };
        if self.tf_link.is_empty() {
            return Err(invalid("tf_link", self.tf_link.clone()));
        }
        if !self.default_declination.is_finite() {
            return Err(invalid("default", self.default_declination.to_string()));
        }
        self.lookup_timeout()?;
        if !(self.cache_time.is_finite() && self.cache_time > 0.0) {
            return Err(invalid("cache_time", self.cache_time.to_string()));
        }
        Ok(())
    }

    /// 坐标变换查询的最长等待时间，负数、NaN 或超出 [Duration] 范围时报错
    pub fn lookup_timeout(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.transform_timeout).map_err(|_| {
            ConfigError::InvalidValue {
                name: "transform_timeout".to_string(),
                value: self.transform_timeout.to_string(),
            }
        })
    }

    /// 重映射后的话题名
    pub fn resolve_topic<'a>(&'a self, name: &'a str) -> &'a str {
        self.remappings.get(name).map(String::as_str).unwrap_or(name)
    }
}
