use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// 纳秒时间戳
///
/// `Timestamp(0)` 表示 “最新”：查询变换时使用缓存中最新的数据。
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const LATEST: Timestamp = Timestamp(0);

    pub fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }
    pub fn from_sec(sec: f64) -> Self {
        Timestamp((sec * 1e9).round() as i64)
    }
    pub fn as_nanos(&self) -> i64 {
        self.0
    }
    pub fn as_sec(&self) -> f64 {
        self.0 as f64 / 1e9
    }
    pub fn is_latest(&self) -> bool {
        self.0 == 0
    }
    /// dt
    pub fn duration_since(&self, other: &Timestamp) -> f64 {
        (self.0 - other.0) as f64 / 1e9
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.9}", self.as_sec())
    }
}

#[test]
fn test_timestamp() {
    let t1 = Timestamp::from_sec(1.5);
    let t2 = Timestamp::from_nanos(2_000_000_000);
    assert_eq!(t1.as_nanos(), 1_500_000_000);
    assert_eq!(t2.duration_since(&t1), 0.5);
    assert!(t1 < t2);
    assert!(Timestamp::LATEST.is_latest());
    assert_eq!(t1.to_string(), "1.500000000");
}
