use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use nalgebra::Isometry3;

use super::{TransformError, TransformerTrait};
use crate::global_types::Timestamp;
use crate::msgs::TransformStamped;
use crate::utility::Utility;

/// 坐标系树的最大深度，超过视为存在环
const MAX_GRAPH_DEPTH: usize = 1000;

/// 单个子坐标系到其父坐标系的变换历史，按时间升序
#[derive(Debug, Clone)]
struct TransformCache {
    parent: String,
    is_static: bool,
    samples: VecDeque<(Timestamp, Isometry3<f64>)>,
}

impl TransformCache {
    fn new(parent: &str, is_static: bool) -> Self {
        Self {
            parent: parent.to_string(),
            is_static,
            samples: VecDeque::new(),
        }
    }

    /// 返回 false 表示数据早于缓存窗口而被丢弃
    fn insert(&mut self, stamp: Timestamp, transform: Isometry3<f64>, cache_time: i64) -> bool {
        if self.is_static {
            self.samples.clear();
            self.samples.push_back((stamp, transform));
            return true;
        }
        if let Some((latest, _)) = self.samples.back() {
            if stamp.as_nanos() < latest.as_nanos().saturating_sub(cache_time) {
                return false;
            }
        }
        let index = self.samples.partition_point(|(t, _)| *t < stamp);
        match self.samples.get_mut(index) {
            Some(sample) if sample.0 == stamp => sample.1 = transform,
            _ => self.samples.insert(index, (stamp, transform)),
        }
        // 清理过期数据
        if let Some((latest, _)) = self.samples.back().copied() {
            while let Some((oldest, _)) = self.samples.front() {
                if oldest.as_nanos() < latest.as_nanos().saturating_sub(cache_time) {
                    self.samples.pop_front();
                } else {
                    break;
                }
            }
        }
        true
    }

    /// T_parent_child
    fn get(&self, child: &str, stamp: Timestamp) -> Result<Isometry3<f64>, TransformError> {
        let (earliest, first) = match self.samples.front() {
            Some(sample) => *sample,
            None => return Err(TransformError::Lookup(child.to_string())),
        };
        let (latest, last) = self.samples.back().copied().unwrap_or((earliest, first));
        if self.is_static || stamp.is_latest() {
            return Ok(last);
        }
        if stamp < earliest || stamp > latest {
            return Err(TransformError::Extrapolation {
                frame: child.to_string(),
                requested: stamp,
                earliest,
                latest,
            });
        }
        let index = self.samples.partition_point(|(t, _)| *t < stamp);
        let (t1, p1) = self.samples[index];
        if t1 == stamp || index == 0 {
            return Ok(p1);
        }
        let (t0, p0) = self.samples[index - 1];
        let ratio = stamp.duration_since(&t0) / t1.duration_since(&t0);
        Ok(Utility::interpolate(&p0, &p1, ratio))
    }
}

/// 带时间戳的坐标变换树
///
/// 每个子坐标系只有一个父坐标系。查询时沿两条链向上找到公共祖先后组合变换。
#[derive(Debug)]
pub struct TransformBuffer {
    /// 单位 ns
    cache_time: i64,
    frames: Mutex<HashMap<String, TransformCache>>,
    updated: Condvar,
}

impl Default for TransformBuffer {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl TransformBuffer {
    pub fn new(cache_time: f64) -> Self {
        Self {
            cache_time: Timestamp::from_sec(cache_time).as_nanos(),
            frames: Mutex::new(HashMap::new()),
            updated: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TransformCache>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_transform(
        &self,
        msg: &TransformStamped,
        is_static: bool,
    ) -> Result<(), TransformError> {
        let parent = msg.header.frame_id.as_str();
        let child = msg.child_frame_id.as_str();
        if parent.is_empty() || child.is_empty() {
            return Err(TransformError::InvalidArgument(format!(
                "empty frame id in transform \"{}\" -> \"{}\"",
                parent, child
            )));
        }
        if parent == child {
            return Err(TransformError::InvalidArgument(format!(
                "frame \"{}\" cannot be its own parent",
                child
            )));
        }
        let t = &msg.transform;
        let values = [
            t.translation.x,
            t.translation.y,
            t.translation.z,
            t.rotation.x,
            t.rotation.y,
            t.rotation.z,
            t.rotation.w,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(TransformError::InvalidArgument(format!(
                "transform \"{}\" -> \"{}\" contains non-finite values",
                parent, child
            )));
        }
        if !Utility::is_normalized(&nalgebra::Quaternion::from(&t.rotation)) {
            return Err(TransformError::InvalidArgument(format!(
                "transform \"{}\" -> \"{}\" has an unnormalized rotation",
                parent, child
            )));
        }

        let transform = Isometry3::from(t);
        let mut frames = self.lock();
        let cache = frames
            .entry(child.to_string())
            .or_insert_with(|| TransformCache::new(parent, is_static));
        if cache.parent != parent || cache.is_static != is_static {
            log::debug!(
                "frame \"{}\" re-parented from \"{}\" to \"{}\"",
                child,
                cache.parent,
                parent
            );
            *cache = TransformCache::new(parent, is_static);
        }
        if !cache.insert(msg.header.stamp, transform, self.cache_time) {
            log::warn!(
                "ignoring old transform \"{}\" -> \"{}\" at {}",
                parent,
                child,
                msg.header.stamp
            );
            return Ok(());
        }
        drop(frames);
        self.updated.notify_all();
        Ok(())
    }

    /// 等待变换可用，最多 `timeout`
    pub fn wait_for_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Timestamp,
        timeout: Duration,
    ) -> Result<Isometry3<f64>, TransformError> {
        let start = Instant::now();
        let mut frames = self.lock();
        loop {
            let err = match lookup(&frames, target_frame, source_frame, stamp) {
                Ok(transform) => return Ok(transform),
                Err(err) => err,
            };
            let waited = start.elapsed();
            if waited >= timeout {
                if timeout.is_zero() {
                    return Err(err);
                }
                return Err(TransformError::Timeout {
                    waited,
                    cause: Box::new(err),
                });
            }
            frames = self
                .updated
                .wait_timeout(frames, timeout - waited)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// 所有已知坐标系，按名称排序
    pub fn frame_names(&self) -> Vec<String> {
        let frames = self.lock();
        let mut names: Vec<String> = frames
            .iter()
            .flat_map(|(child, cache)| [child.clone(), cache.parent.clone()])
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl TransformerTrait for TransformBuffer {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Timestamp,
    ) -> Result<Isometry3<f64>, TransformError> {
        lookup(&self.lock(), target_frame, source_frame, stamp)
    }
}

fn frame_exists(frames: &HashMap<String, TransformCache>, frame: &str) -> bool {
    frames.contains_key(frame) || frames.values().any(|cache| cache.parent == frame)
}

/// T_target_source
fn lookup(
    frames: &HashMap<String, TransformCache>,
    target_frame: &str,
    source_frame: &str,
    stamp: Timestamp,
) -> Result<Isometry3<f64>, TransformError> {
    if target_frame.is_empty() || source_frame.is_empty() {
        return Err(TransformError::InvalidArgument(
            "frame id must not be empty".to_string(),
        ));
    }
    if target_frame == source_frame {
        return Ok(Isometry3::identity());
    }
    for frame in [source_frame, target_frame] {
        if !frame_exists(frames, frame) {
            return Err(TransformError::Lookup(frame.to_string()));
        }
    }

    // source 链：frame -> T_frame_source
    let mut source_chain: Vec<(&str, Isometry3<f64>)> = vec![(source_frame, Isometry3::identity())];
    let mut source_err = None;
    while let Some((frame, frame_to_source)) = source_chain.last().copied() {
        let Some(cache) = frames.get(frame) else {
            break;
        };
        if source_chain.len() > MAX_GRAPH_DEPTH {
            return Err(TransformError::InvalidArgument(format!(
                "the frame tree above \"{}\" contains a loop",
                source_frame
            )));
        }
        match cache.get(frame, stamp) {
            Ok(parent_to_frame) => {
                source_chain.push((cache.parent.as_str(), parent_to_frame * frame_to_source))
            }
            Err(err) => {
                source_err = Some(err);
                break;
            }
        }
    }

    // target 链，遇到 source 链上的坐标系即为公共祖先
    let mut frame = target_frame;
    let mut frame_to_target = Isometry3::identity();
    for _ in 0..=MAX_GRAPH_DEPTH {
        if let Some((_, frame_to_source)) = source_chain.iter().find(|(f, _)| *f == frame) {
            return Ok(frame_to_target.inverse() * frame_to_source);
        }
        let Some(cache) = frames.get(frame) else {
            return Err(source_err.unwrap_or_else(|| TransformError::Connectivity {
                target: target_frame.to_string(),
                source_frame: source_frame.to_string(),
            }));
        };
        frame_to_target = cache.get(frame, stamp)? * frame_to_target;
        frame = cache.parent.as_str();
    }
    Err(TransformError::InvalidArgument(format!(
        "the frame tree above \"{}\" contains a loop",
        target_frame
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::{Header, Quaternion, Transform, Vector3};
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::Arc;

    fn transform_msg(
        parent: &str,
        child: &str,
        stamp: f64,
        translation: [f64; 3],
        yaw: f64,
    ) -> TransformStamped {
        TransformStamped {
            header: Header {
                stamp: Timestamp::from_sec(stamp),
                frame_id: parent.to_string(),
            },
            child_frame_id: child.to_string(),
            transform: Transform {
                translation: Vector3::new(translation[0], translation[1], translation[2]),
                rotation: Quaternion::from(&Utility::yaw_quat(yaw)),
            },
        }
    }

    #[test]
    fn test_same_frame_is_identity() {
        let buffer = TransformBuffer::default();
        let transform = buffer
            .lookup_transform("base_link", "base_link", Timestamp(5))
            .unwrap();
        assert_eq!(transform, Isometry3::identity());
    }

    #[test]
    fn test_static_chain() {
        let buffer = TransformBuffer::default();
        buffer
            .set_transform(&transform_msg("base_link", "mount", 0.0, [1.0, 0.0, 0.0], FRAC_PI_2), true)
            .unwrap();
        buffer
            .set_transform(&transform_msg("mount", "imu_link", 0.0, [0.0, 1.0, 0.0], FRAC_PI_2), true)
            .unwrap();

        // static data is valid at any time
        let t = buffer
            .lookup_transform("base_link", "imu_link", Timestamp::from_sec(123.0))
            .unwrap();
        let p = t * nalgebra::Point3::origin();
        assert_relative_eq!(p.coords, nalgebra::Vector3::new(0.0, 0.0, 0.0), epsilon = 1e-12);
        let x = t.rotation * nalgebra::Vector3::x();
        assert_relative_eq!(x, -nalgebra::Vector3::x(), epsilon = 1e-12);

        // inverse direction
        let inv = buffer
            .lookup_transform("imu_link", "base_link", Timestamp::from_sec(1.0))
            .unwrap();
        assert_relative_eq!(inv * t, Isometry3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_sibling_frames() {
        let buffer = TransformBuffer::default();
        buffer
            .set_transform(&transform_msg("base_link", "imu_link", 0.0, [0.0; 3], FRAC_PI_2), true)
            .unwrap();
        buffer
            .set_transform(&transform_msg("base_link", "gps_link", 0.0, [0.0; 3], -FRAC_PI_2), true)
            .unwrap();
        let t = buffer
            .lookup_transform("gps_link", "imu_link", Timestamp::LATEST)
            .unwrap();
        assert_relative_eq!(t.rotation.angle(), std::f64::consts::PI, epsilon = 1e-9);
    }

    #[test]
    fn test_interpolation_and_extrapolation() {
        let buffer = TransformBuffer::default();
        buffer
            .set_transform(&transform_msg("odom", "base_link", 1.0, [0.0; 3], 0.0), false)
            .unwrap();
        buffer
            .set_transform(&transform_msg("odom", "base_link", 2.0, [2.0, 0.0, 0.0], 1.0), false)
            .unwrap();

        let t = buffer
            .lookup_transform("odom", "base_link", Timestamp::from_sec(1.5))
            .unwrap();
        assert_relative_eq!(t.translation.vector.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(t.rotation.euler_angles().2, 0.5, epsilon = 1e-9);

        let latest = buffer
            .lookup_transform("odom", "base_link", Timestamp::LATEST)
            .unwrap();
        assert_relative_eq!(latest.translation.vector.x, 2.0, epsilon = 1e-12);

        assert!(matches!(
            buffer.lookup_transform("odom", "base_link", Timestamp::from_sec(2.5)),
            Err(TransformError::Extrapolation { .. })
        ));
        assert!(matches!(
            buffer.lookup_transform("base_link", "odom", Timestamp::from_sec(0.5)),
            Err(TransformError::Extrapolation { .. })
        ));
    }

    #[test]
    fn test_unknown_and_disconnected_frames() {
        let buffer = TransformBuffer::default();
        buffer
            .set_transform(&transform_msg("base_link", "imu_link", 0.0, [0.0; 3], 0.0), true)
            .unwrap();
        buffer
            .set_transform(&transform_msg("map", "gps_link", 0.0, [0.0; 3], 0.0), true)
            .unwrap();

        assert_eq!(
            buffer.lookup_transform("base_link", "camera_link", Timestamp(1)),
            Err(TransformError::Lookup("camera_link".to_string()))
        );
        assert!(matches!(
            buffer.lookup_transform("gps_link", "imu_link", Timestamp(1)),
            Err(TransformError::Connectivity { .. })
        ));
        assert!(buffer
            .lookup_transform("base_link", "imu_link", Timestamp(1))
            .is_ok());
        assert!(buffer
            .lookup_transform("map", "imu_link", Timestamp(1))
            .is_err());
        assert_eq!(
            buffer.frame_names(),
            vec!["base_link", "gps_link", "imu_link", "map"]
        );
    }

    #[test]
    fn test_rejects_invalid_transforms() {
        let buffer = TransformBuffer::default();
        let mut msg = transform_msg("base_link", "imu_link", 0.0, [0.0; 3], 0.0);
        msg.transform.rotation.w = 0.5;
        assert!(buffer.set_transform(&msg, false).is_err());

        let mut msg = transform_msg("base_link", "imu_link", 0.0, [0.0; 3], 0.0);
        msg.transform.translation.x = f64::NAN;
        assert!(buffer.set_transform(&msg, false).is_err());

        let msg = transform_msg("base_link", "base_link", 0.0, [0.0; 3], 0.0);
        assert!(buffer.set_transform(&msg, false).is_err());
        assert!(buffer.frame_names().is_empty());
    }

    #[test]
    fn test_cache_time() {
        let buffer = TransformBuffer::new(1.0);
        for i in 0..5 {
            let msg = transform_msg("odom", "base_link", i as f64, [i as f64, 0.0, 0.0], 0.0);
            buffer.set_transform(&msg, false).unwrap();
        }
        assert!(buffer
            .lookup_transform("odom", "base_link", Timestamp::from_sec(3.5))
            .is_ok());
        assert!(matches!(
            buffer.lookup_transform("odom", "base_link", Timestamp::from_sec(1.5)),
            Err(TransformError::Extrapolation { .. })
        ));
    }

    #[test]
    fn test_cache_time_near_timestamp_min() {
        let buffer = TransformBuffer::new(1.0);
        for (i, nanos) in [i64::MIN + 10, i64::MIN + 20].into_iter().enumerate() {
            let mut msg = transform_msg("odom", "base_link", 0.0, [i as f64, 0.0, 0.0], 0.0);
            msg.header.stamp = Timestamp(nanos);
            buffer.set_transform(&msg, false).unwrap();
        }
        let t = buffer
            .lookup_transform("odom", "base_link", Timestamp(i64::MIN + 15))
            .unwrap();
        assert_relative_eq!(t.translation.vector.x, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_wait_for_transform() {
        let buffer = Arc::new(TransformBuffer::default());
        let stamp = Timestamp::from_sec(1.0);

        let err = buffer
            .wait_for_transform("base_link", "imu_link", stamp, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, TransformError::Timeout { .. }));

        let err = buffer
            .wait_for_transform("base_link", "imu_link", stamp, Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, TransformError::Lookup("imu_link".to_string()));

        let publisher = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                buffer
                    .set_transform(&transform_msg("base_link", "imu_link", 1.0, [0.0; 3], 0.0), false)
                    .unwrap();
            })
        };
        let transform = buffer
            .wait_for_transform("base_link", "imu_link", stamp, Duration::from_secs(5))
            .unwrap();
        assert_eq!(transform, Isometry3::identity());
        publisher.join().unwrap();
    }
}
