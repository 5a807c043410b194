//! 进程内话题总线
//!
//! 每个话题第一次 advertise/subscribe 时按给定队列长度创建一个有界 crossbeam 通道。
//! [Bus::merge] 可以把多个不同类型的话题接到同一个通道，订阅者按到达顺序收到消息。
//! 总线只负责连接：所有发布者和订阅者创建完成后应当 drop 总线，
//! 这样发布者全部退出时订阅者能收到断开。

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendError, Sender, TrySendError};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("topic `{0}` already exists with a different message type")]
    TypeMismatch(String),

    #[error("topic `{0}` already has a subscriber")]
    AlreadySubscribed(String),

    #[error("topic `{0}` already has publishers, merge it before advertising")]
    AlreadyAdvertised(String),

    #[error("topic `{0}` has no subscriber")]
    Disconnected(String),

    #[error("queue of topic `{0}` is full, message dropped")]
    Full(String),
}

/// 话题消息 `T` 写入订阅通道的方式
trait Route<T>: Send + Sync {
    fn try_send(&self, msg: T) -> Result<(), TrySendError<()>>;
    fn send(&self, msg: T) -> Result<(), SendError<()>>;
}

/// 转换成 `M` 后写入通道
struct Forward<M> {
    tx: Sender<M>,
}

impl<T, M> Route<T> for Forward<M>
where
    M: From<T> + Send,
{
    fn try_send(&self, msg: T) -> Result<(), TrySendError<()>> {
        self.tx.try_send(M::from(msg)).map_err(|err| match err {
            TrySendError::Full(_) => TrySendError::Full(()),
            TrySendError::Disconnected(_) => TrySendError::Disconnected(()),
        })
    }

    fn send(&self, msg: T) -> Result<(), SendError<()>> {
        self.tx.send(M::from(msg)).map_err(|_| SendError(()))
    }
}

struct Topic<T> {
    route: Arc<dyn Route<T>>,
    rx: Receiver<T>,
    subscribed: bool,
}

impl<T> Topic<T> {
    /// 除了话题自己持有的一份之外是否还有发布者
    fn advertised(&self) -> bool {
        Arc::strong_count(&self.route) > 1
    }
}

#[derive(Default)]
pub struct Bus {
    topics: Mutex<HashMap<String, Box<dyn Any + Send>>>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.topics.lock().map(|t| t.len()).unwrap_or_default();
        f.debug_struct("Bus").field("topics", &topics).finish()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_topic<T, R>(
        &self,
        name: &str,
        queue_size: usize,
        f: impl FnOnce(&mut Topic<T>) -> Result<R, BusError>,
    ) -> Result<R, BusError>
    where
        T: Send + 'static,
    {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = topics.entry(name.to_string()).or_insert_with(|| {
            let (tx, rx) = bounded::<T>(queue_size);
            Box::new(Topic {
                route: Arc::new(Forward { tx }) as Arc<dyn Route<T>>,
                rx,
                subscribed: false,
            }) as Box<dyn Any + Send>
        });
        let topic = entry
            .downcast_mut::<Topic<T>>()
            .ok_or_else(|| BusError::TypeMismatch(name.to_string()))?;
        f(topic)
    }

    pub fn advertise<T>(&self, name: &str, queue_size: usize) -> Result<Publisher<T>, BusError>
    where
        T: Send + 'static,
    {
        self.with_topic(name, queue_size, |topic: &mut Topic<T>| {
            Ok(Publisher {
                topic: name.to_string(),
                route: topic.route.clone(),
            })
        })
    }

    /// 每个话题只允许一个订阅者
    pub fn subscribe<T>(&self, name: &str, queue_size: usize) -> Result<Subscriber<T>, BusError>
    where
        T: Send + 'static,
    {
        self.with_topic(name, queue_size, |topic: &mut Topic<T>| {
            if topic.subscribed {
                return Err(BusError::AlreadySubscribed(name.to_string()));
            }
            topic.subscribed = true;
            Ok(Subscriber {
                topic: name.to_string(),
                rx: topic.rx.clone(),
            })
        })
    }

    /// 开始一个合并订阅，消息类型 `M` 需要能从每个话题的消息类型转换而来
    pub fn merge<M>(&self, queue_size: usize) -> Merge<'_, M>
    where
        M: Send + 'static,
    {
        let (tx, rx) = bounded(queue_size);
        Merge {
            bus: self,
            topics: Vec::new(),
            tx,
            rx,
        }
    }
}

/// 多个话题共用一个有界队列，见 [Bus::merge]
pub struct Merge<'a, M> {
    bus: &'a Bus,
    topics: Vec<String>,
    tx: Sender<M>,
    rx: Receiver<M>,
}

impl<M> Merge<'_, M>
where
    M: Send + 'static,
{
    /// 必须在该话题的任何 advertise 之前调用
    pub fn topic<T>(mut self, name: &str) -> Result<Self, BusError>
    where
        T: Send + 'static,
        M: From<T>,
    {
        let tx = self.tx.clone();
        self.bus.with_topic(name, 0, |topic: &mut Topic<T>| {
            if topic.subscribed {
                return Err(BusError::AlreadySubscribed(name.to_string()));
            }
            if topic.advertised() {
                return Err(BusError::AlreadyAdvertised(name.to_string()));
            }
            topic.subscribed = true;
            topic.route = Arc::new(Forward { tx });
            Ok(())
        })?;
        self.topics.push(name.to_string());
        Ok(self)
    }

    pub fn subscribe(self) -> Subscriber<M> {
        Subscriber {
            topic: self.topics.join(","),
            rx: self.rx,
        }
    }
}

pub struct Publisher<T> {
    topic: String,
    route: Arc<dyn Route<T>>,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            route: self.route.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").field("topic", &self.topic).finish()
    }
}

impl<T> Publisher<T> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 不阻塞，队列满时丢弃该消息
    pub fn publish(&self, msg: T) -> Result<(), BusError> {
        self.route.try_send(msg).map_err(|err| match err {
            TrySendError::Full(()) => BusError::Full(self.topic.clone()),
            TrySendError::Disconnected(()) => BusError::Disconnected(self.topic.clone()),
        })
    }

    /// 队列满时阻塞，直到订阅者取走消息
    pub fn publish_blocking(&self, msg: T) -> Result<(), BusError> {
        self.route
            .send(msg)
            .map_err(|_| BusError::Disconnected(self.topic.clone()))
    }
}

#[derive(Debug)]
pub struct Subscriber<T> {
    topic: String,
    rx: Receiver<T>,
}

impl<T> Subscriber<T> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 用于 `select!`
    pub fn receiver(&self) -> &Receiver<T> {
        &self.rx
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// 所有发布者断开后结束
    pub fn iter(&self) -> crossbeam_channel::Iter<'_, T> {
        self.rx.iter()
    }
}
