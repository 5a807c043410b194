use std::sync::atomic::{AtomicBool, Ordering};

use super::DatasetTrait;
use crate::bus::{Bus, BusError, Publisher};
use crate::config::*;
use crate::global_types::Timestamp;
use crate::msgs::{Float32, Imu, TransformStamped};

enum Event<'a> {
    Transform(&'a TransformStamped),
    Declination(&'a Float32),
    Imu(&'a Imu),
}

impl Event<'_> {
    /// 同一时间戳时先发布坐标变换，再发布磁偏角，最后是 IMU
    fn priority(&self) -> u8 {
        match self {
            Event::Transform(_) => 0,
            Event::Declination(_) => 1,
            Event::Imu(_) => 2,
        }
    }
}

/// 按时间顺序把数据集发布到 `data`、`declination`、`tf` 和 `tf_static`
#[derive(Debug)]
pub struct Player {
    pub_imu: Publisher<Imu>,
    pub_declination: Publisher<Float32>,
    pub_tf: Publisher<TransformStamped>,
    pub_tf_static: Publisher<TransformStamped>,
}

impl Player {
    pub fn new(bus: &Bus, params: &Params) -> Result<Self, BusError> {
        Ok(Self {
            pub_imu: bus.advertise(params.resolve_topic(IMU_TOPIC), QUEUE_SIZE)?,
            pub_declination: bus.advertise(params.resolve_topic(DECLINATION_TOPIC), QUEUE_SIZE)?,
            pub_tf: bus.advertise(params.resolve_topic(TF_TOPIC), TF_QUEUE_SIZE)?,
            pub_tf_static: bus.advertise(params.resolve_topic(TF_STATIC_TOPIC), TF_QUEUE_SIZE)?,
        })
    }

    /// 返回发布的消息数。结束后所有发布者被 drop。
    pub fn play<D>(self, dataset: &D, running: &AtomicBool) -> Result<usize, BusError>
    where
        D: DatasetTrait,
    {
        let mut count = 0;
        // 静态变换与时间无关，最先发布
        for (_, transform) in dataset.transforms().iter().filter(|(s, _)| *s) {
            self.pub_tf_static.publish_blocking(transform.clone())?;
            count += 1;
        }

        let mut events: Vec<(Timestamp, Event)> = dataset
            .transforms()
            .iter()
            .filter(|(is_static, _)| !is_static)
            .map(|(_, t)| (t.header.stamp, Event::Transform(t)))
            .chain(
                dataset
                    .declinations()
                    .iter()
                    .map(|(stamp, d)| (*stamp, Event::Declination(d))),
            )
            .chain(
                dataset
                    .imu_samples()
                    .iter()
                    .map(|imu| (imu.header.stamp, Event::Imu(imu))),
            )
            .collect();
        events.sort_by_key(|(stamp, event)| (*stamp, event.priority()));

        for (_, event) in events {
            if !running.load(Ordering::Relaxed) {
                log::info!("replay interrupted after {} messages", count);
                break;
            }
            match event {
                Event::Transform(t) => self.pub_tf.publish_blocking(t.clone())?,
                Event::Declination(d) => self.pub_declination.publish_blocking(*d)?,
                Event::Imu(imu) => self.pub_imu.publish_blocking(imu.clone())?,
            }
            count += 1;
        }
        log::info!("replay finished, {} messages published", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DefaultDataset;
    use crate::msgs::Header;

    fn imu(stamp: i64) -> Imu {
        Imu {
            header: Header {
                stamp: Timestamp(stamp),
                frame_id: "imu_link".to_string(),
            },
            ..Default::default()
        }
    }

    fn transform(stamp: i64) -> TransformStamped {
        TransformStamped {
            header: Header {
                stamp: Timestamp(stamp),
                frame_id: "base_link".to_string(),
            },
            child_frame_id: "imu_link".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_play_in_time_order() {
        let dataset = DefaultDataset {
            imu0s: vec![imu(10), imu(20), imu(30)],
            declinations: vec![(Timestamp(20), Float32 { data: 0.3 })],
            transforms: vec![(false, transform(30)), (true, transform(99))],
        };
        let mut params = Params::default();
        params
            .remappings
            .insert("data".to_string(), "imu/data".to_string());

        let bus = Bus::new();
        let player = Player::new(&bus, &params).unwrap();
        let imu_sub = bus.subscribe::<Imu>("imu/data", QUEUE_SIZE).unwrap();
        let decl_sub = bus.subscribe::<Float32>(DECLINATION_TOPIC, QUEUE_SIZE).unwrap();
        let tf_sub = bus.subscribe::<TransformStamped>(TF_TOPIC, TF_QUEUE_SIZE).unwrap();
        let tf_static_sub = bus
            .subscribe::<TransformStamped>(TF_STATIC_TOPIC, TF_QUEUE_SIZE)
            .unwrap();
        drop(bus);

        // queues hold everything, so blocking never waits
        let count = player.play(&dataset, &AtomicBool::new(true)).unwrap();
        assert_eq!(count, 6);

        let stamps: Vec<i64> = imu_sub.iter().map(|m| m.header.stamp.0).collect();
        assert_eq!(stamps, vec![10, 20, 30]);
        assert_eq!(decl_sub.iter().count(), 1);
        assert_eq!(tf_sub.iter().next().unwrap().header.stamp, Timestamp(30));
        assert_eq!(tf_static_sub.iter().count(), 1);
    }

    #[test]
    fn test_play_interrupted() {
        let dataset = DefaultDataset {
            imu0s: vec![imu(10), imu(20)],
            ..Default::default()
        };
        let bus = Bus::new();
        let player = Player::new(&bus, &Params::default()).unwrap();
        let imu_sub = bus.subscribe::<Imu>(IMU_TOPIC, QUEUE_SIZE).unwrap();
        drop(bus);

        let count = player.play(&dataset, &AtomicBool::new(false)).unwrap();
        assert_eq!(count, 0);
        assert_eq!(imu_sub.iter().count(), 0);
    }

    #[test]
    fn test_play_without_subscriber() {
        let dataset = DefaultDataset {
            imu0s: vec![imu(10)],
            ..Default::default()
        };
        let bus = Bus::new();
        let player = Player::new(&bus, &Params::default()).unwrap();
        drop(bus);
        assert_eq!(
            player.play(&dataset, &AtomicBool::new(true)),
            Err(BusError::Disconnected(IMU_TOPIC.to_string()))
        );
    }
}
