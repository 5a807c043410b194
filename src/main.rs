/// nalgebra
/// https://docs.rs/nalgebra/latest/nalgebra/
///
/// crossbeam-channel
/// https://docs.rs/crossbeam-channel/latest/crossbeam_channel/
///
// usage: imu-declination [params.json] [_tf_link:=base_link] [_default:=0.0] [data:=imu/data]
mod bus;
mod config;
mod dataset;
mod declination;
mod global_cast;
mod global_types;
mod msgs;
mod node;
mod save;
mod tf;
mod utility;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context};

use crate::bus::Bus;
use crate::config::*;
use crate::declination::DeclinationTransform;
use crate::msgs::Imu;
use crate::node::ApplyDeclination;
use crate::tf::{TransformBuffer, TransformListener};

/// 输出文件写入较慢时的缓冲
const SINK_QUEUE_SIZE: usize = 1000;

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_nanos()
        .init();

    let params = Params::from_args(std::env::args().skip(1))?;
    log::info!("{} starting", NODE_NAME);
    log::info!("  tf_link: {}", params.tf_link);
    log::info!("  default declination: {} rad", params.default_declination);

    let imu_csv = params
        .imu_csv
        .as_deref()
        .context("parameter `imu_csv` is required")?;
    let dataset = dataset::DefaultDataset::new(
        imu_csv,
        params.declination_csv.as_deref(),
        params.transforms_json.as_deref(),
    )?;
    let mut writer = save::ImuWriter::create(params.output.as_deref())?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let bus = Bus::new();
    let imu_decl_sub = bus.subscribe::<Imu>(params.resolve_topic(IMU_DECL_TOPIC), SINK_QUEUE_SIZE)?;
    let pub_imu = bus.advertise(params.resolve_topic(IMU_DECL_TOPIC), QUEUE_SIZE)?;
    let input = node::subscribe_inputs(&bus, &params)?;
    let tf_buffer = Arc::new(TransformBuffer::new(params.cache_time));
    let tf_listener = TransformListener::new(
        tf_buffer.clone(),
        params.lookup_timeout()?,
        bus.subscribe(params.resolve_topic(TF_TOPIC), TF_QUEUE_SIZE)?,
        bus.subscribe(params.resolve_topic(TF_STATIC_TOPIC), TF_QUEUE_SIZE)?,
    )?;
    let player = dataset::Player::new(&bus, &params)?;
    drop(bus);

    let sink = thread::Builder::new()
        .name("sink".into())
        .spawn(move || -> anyhow::Result<usize> {
            for imu in imu_decl_sub.iter() {
                writer.write(&imu)?;
            }
            writer.finish()
        })?;
    let replay = {
        let running = running.clone();
        thread::Builder::new()
            .name("replay".into())
            .spawn(move || player.play(&dataset, &running))?
    };

    let mut node = ApplyDeclination::new(
        params.tf_link.as_str(),
        tf_listener,
        DeclinationTransform::new(params.default_declination),
        pub_imu,
    );
    node.spin(&input, &running);
    let stats = node.stats();
    // 断开 data_decl 让 sink 结束，断开输入让阻塞中的回放退出
    let tf_listener = node.into_transformer();
    drop(input);

    match replay.join() {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => log::warn!("replay stopped early: {}", err),
        Err(_) => return Err(anyhow!("replay thread panicked")),
    }
    let written = sink
        .join()
        .map_err(|_| anyhow!("sink thread panicked"))??;

    if tf_listener.join().is_err() {
        return Err(anyhow!("tf listener thread panicked"));
    }

    log::debug!("known frames: {:?}", tf_buffer.frame_names());
    log::info!(
        "received {}, published {}, dropped {}, declination updates {}, written {}",
        stats.received,
        stats.published,
        stats.dropped,
        stats.declination_updates,
        written
    );
    Ok(())
}
