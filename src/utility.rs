use nalgebra::{Isometry3, UnitQuaternion};

/// 四元数模长平方与 1 的最大允许偏差
pub const QUATERNION_NORM_TOLERANCE: f64 = 0.01;

pub struct Utility {}

impl Utility {
    /// 绕 Z 轴（竖直轴）旋转 `yaw` 弧度，roll 和 pitch 为 0
    #[inline]
    pub fn yaw_quat(yaw: f64) -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(0.0, 0.0, yaw)
    }

    #[inline]
    pub fn is_normalized(q: &nalgebra::Quaternion<f64>) -> bool {
        (q.norm_squared() - 1.0).abs() <= QUATERNION_NORM_TOLERANCE
    }

    /// 平移线性插值，旋转球面插值。旋转相差 180° 时取更近的一端。
    pub fn interpolate(a: &Isometry3<f64>, b: &Isometry3<f64>, ratio: f64) -> Isometry3<f64> {
        a.try_lerp_slerp(b, ratio, 1.0e-9)
            .unwrap_or(if ratio < 0.5 { *a } else { *b })
    }
}
