//! apply_declination_to_imu
//!
//! 把 IMU 数据变换到 `tf_link` 坐标系，再用磁偏角旋转姿态后发布到 `data_decl`。
//! 任一坐标变换失败则整条数据丢弃。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use nalgebra::UnitQuaternion;

use crate::bus::{Bus, BusError, Publisher, Subscriber};
use crate::config::*;
use crate::declination::DeclinationTransform;
use crate::msgs::{Float32, Header, Imu};
use crate::tf::{Stamped, TransformError, TransformerTrait};

/// 检查退出标志的间隔
const SPIN_INTERVAL: Duration = Duration::from_millis(10);

/// `data` 和 `declination` 共用一个队列，回调按到达顺序执行
#[derive(Debug, Clone, PartialEq)]
pub enum NodeMsg {
    Imu(Imu),
    Declination(Float32),
}

impl From<Imu> for NodeMsg {
    fn from(imu: Imu) -> Self {
        NodeMsg::Imu(imu)
    }
}

impl From<Float32> for NodeMsg {
    fn from(declination_msg: Float32) -> Self {
        NodeMsg::Declination(declination_msg)
    }
}

/// 订阅 `data` 和 `declination`，必须在这两个话题被 advertise 之前调用
pub fn subscribe_inputs(bus: &Bus, params: &Params) -> Result<Subscriber<NodeMsg>, BusError> {
    Ok(bus
        .merge::<NodeMsg>(2 * QUEUE_SIZE)
        .topic::<Imu>(params.resolve_topic(IMU_TOPIC))?
        .topic::<Float32>(params.resolve_topic(DECLINATION_TOPIC))?
        .subscribe())
}

/// 处理计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub received: u64,
    pub published: u64,
    /// 坐标变换失败
    pub dropped: u64,
    pub declination_updates: u64,
}

/// 把 IMU 的姿态、角速度和线加速度分别变换到 `tf_link`
///
/// 输出的时间戳不变，frame_id 为 `tf_link`，协方差为 0（未知）。
pub fn imu_to_frame<T>(tf_listener: &T, tf_link: &str, imu_in: &Imu) -> Result<Imu, TransformError>
where
    T: TransformerTrait + ?Sized,
{
    let stamp = imu_in.header.stamp;
    let frame_id = imu_in.header.frame_id.as_str();

    let orient_in = Stamped::new((&imu_in.orientation).into(), stamp, frame_id);
    let orient_out = tf_listener.transform_quaternion(tf_link, &orient_in)?;

    let vel_in = Stamped::new((&imu_in.angular_velocity).into(), stamp, frame_id);
    let vel_out = tf_listener.transform_vector(tf_link, &vel_in)?;

    let accel_in = Stamped::new((&imu_in.linear_acceleration).into(), stamp, frame_id);
    let accel_out = tf_listener.transform_vector(tf_link, &accel_in)?;

    Ok(Imu {
        header: Header {
            stamp,
            frame_id: tf_link.to_string(),
        },
        orientation: (&orient_out.data).into(),
        angular_velocity: (&vel_out.data).into(),
        linear_acceleration: (&accel_out.data).into(),
        ..Default::default()
    })
}

#[derive(Debug)]
pub struct ApplyDeclination<T>
where
    T: TransformerTrait,
{
    tf_link: String,
    tf_listener: T,
    declination: DeclinationTransform,
    pub_imu: Publisher<Imu>,
    stats: NodeStats,
}

impl<T> ApplyDeclination<T>
where
    T: TransformerTrait,
{
    pub fn new(
        tf_link: impl Into<String>,
        tf_listener: T,
        declination: DeclinationTransform,
        pub_imu: Publisher<Imu>,
    ) -> Self {
        Self {
            tf_link: tf_link.into(),
            tf_listener,
            declination,
            pub_imu,
            stats: NodeStats::default(),
        }
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    /// 停止节点，`data_decl` 的发布者随之断开
    pub fn into_transformer(self) -> T {
        self.tf_listener
    }

    /// 变换到 `tf_link` 并旋转姿态，不发布
    pub fn correct(&self, imu_in: &Imu) -> Result<Imu, TransformError> {
        // Must move imu into tf_link frame before applying declination.
        let mut imu = imu_to_frame(&self.tf_listener, &self.tf_link, imu_in)?;

        let orient = UnitQuaternion::new_normalize((&imu.orientation).into());
        imu.orientation = (&self.declination.apply(&orient)).into();
        Ok(imu)
    }

    /// `data` 话题回调
    pub fn handle_imu(&mut self, imu_in: &Imu) {
        self.stats.received += 1;
        let imu = match self.correct(imu_in) {
            Ok(imu) => imu,
            Err(err) => {
                self.stats.dropped += 1;
                log::warn!(
                    "dropping imu sample at {} from \"{}\": {}",
                    imu_in.header.stamp,
                    imu_in.header.frame_id,
                    err
                );
                return;
            }
        };
        match self.pub_imu.publish(imu) {
            Ok(()) => self.stats.published += 1,
            Err(err @ BusError::Full(_)) => log::warn!("{}", err),
            Err(err) => log::debug!("{}", err),
        }
    }

    /// `declination` 话题回调
    pub fn handle_declination(&mut self, declination_msg: &Float32) {
        self.stats.declination_updates += 1;
        self.declination.msg(declination_msg);
    }

    /// 按到达顺序处理输入，直到所有输入的发布者断开或 `running` 为 false
    pub fn spin(&mut self, input: &Subscriber<NodeMsg>, running: &AtomicBool) {
        log::info!(
            "spinning: `{}` -> `{}` in frame \"{}\"",
            input.topic(),
            self.pub_imu.topic(),
            self.tf_link
        );
        while running.load(Ordering::Relaxed) {
            match input.recv_timeout(SPIN_INTERVAL) {
                Ok(NodeMsg::Imu(imu)) => self.handle_imu(&imu),
                Ok(NodeMsg::Declination(declination_msg)) => {
                    self.handle_declination(&declination_msg)
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("`{}` closed", input.topic());
                    break;
                }
            }
        }
    }
}
