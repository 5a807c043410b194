use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{never, select, Receiver};
use nalgebra::Isometry3;

use super::{TransformBuffer, TransformError, TransformerTrait};
use crate::bus::Subscriber;
use crate::global_types::Timestamp;
use crate::msgs::TransformStamped;

/// 在后台线程中把 `tf`/`tf_static` 写入 [TransformBuffer]，查询时最多等待 `timeout`
#[derive(Debug)]
pub struct TransformListener {
    buffer: Arc<TransformBuffer>,
    timeout: Duration,
    handle: Option<JoinHandle<()>>,
}

impl TransformListener {
    pub fn new(
        buffer: Arc<TransformBuffer>,
        timeout: Duration,
        tf_sub: Subscriber<TransformStamped>,
        tf_static_sub: Subscriber<TransformStamped>,
    ) -> std::io::Result<Self> {
        let handle = {
            let buffer = buffer.clone();
            thread::Builder::new()
                .name("tf-listener".into())
                .spawn(move || run_listener(&buffer, tf_sub, tf_static_sub))?
        };
        Ok(Self {
            buffer,
            timeout,
            handle: Some(handle),
        })
    }

    /// 等待后台线程结束（`tf` 和 `tf_static` 的发布者都已断开）
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

impl TransformerTrait for TransformListener {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: Timestamp,
    ) -> Result<Isometry3<f64>, TransformError> {
        self.buffer
            .wait_for_transform(target_frame, source_frame, stamp, self.timeout)
    }
}

fn run_listener(
    buffer: &TransformBuffer,
    tf_sub: Subscriber<TransformStamped>,
    tf_static_sub: Subscriber<TransformStamped>,
) {
    log::debug!(
        "tf listener started on `{}` and `{}`",
        tf_sub.topic(),
        tf_static_sub.topic()
    );
    let closed: Receiver<TransformStamped> = never();
    let mut tf_open = true;
    let mut tf_static_open = true;
    while tf_open || tf_static_open {
        let tf_rx = if tf_open { tf_sub.receiver() } else { &closed };
        let tf_static_rx = if tf_static_open {
            tf_static_sub.receiver()
        } else {
            &closed
        };
        select! {
            recv(tf_rx) -> msg => match msg {
                Ok(msg) => insert(buffer, &msg, false),
                Err(_) => tf_open = false,
            },
            recv(tf_static_rx) -> msg => match msg {
                Ok(msg) => insert(buffer, &msg, true),
                Err(_) => tf_static_open = false,
            },
        }
    }
    log::debug!("tf listener stopped");
}

fn insert(buffer: &TransformBuffer, msg: &TransformStamped, is_static: bool) {
    if let Err(err) = buffer.set_transform(msg, is_static) {
        log::error!(
            "rejected transform \"{}\" -> \"{}\": {}",
            msg.header.frame_id,
            msg.child_frame_id,
            err
        );
    }
}
