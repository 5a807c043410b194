//! 磁偏角旋转
//!
//! 保存当前的磁偏角旋转（纯 yaw），可随时被 `declination` 话题的新值整体替换。

use std::sync::{PoisonError, RwLock};

use nalgebra::UnitQuaternion;

use crate::msgs::Float32;
use crate::utility::Utility;

#[derive(Debug)]
pub struct DeclinationTransform {
    rotation: RwLock<UnitQuaternion<f64>>,
}

impl Default for DeclinationTransform {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl DeclinationTransform {
    pub fn new(declination: f64) -> Self {
        let transform = Self {
            rotation: RwLock::new(UnitQuaternion::identity()),
        };
        transform.set_declination(declination);
        transform
    }

    /// 替换为绕竖直轴旋转 `declination` 弧度，不做范围限制。
    /// 非有限值会被忽略，保留原有旋转。
    pub fn set_declination(&self, declination: f64) {
        if !declination.is_finite() {
            log::warn!("ignoring non-finite declination {}", declination);
            return;
        }
        let quat = Utility::yaw_quat(declination);
        *self.rotation.write().unwrap_or_else(PoisonError::into_inner) = quat;
        log::debug!("declination set to {} rad", declination);
    }

    /// `declination` 话题回调
    pub fn msg(&self, declination_msg: &Float32) {
        self.set_declination(declination_msg.data as f64);
    }

    /// 返回 `rotation * orientation`
    pub fn apply(&self, orientation: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        self.rotation() * orientation
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        *self.rotation.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn some_orientation() -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(0.1, -0.2, 0.7)
    }

    #[test]
    fn test_zero_declination_is_identity() {
        let transform = DeclinationTransform::default();
        let q = some_orientation();
        assert_relative_eq!(transform.apply(&q), q, epsilon = 1e-12);
    }

    #[test]
    fn test_set_replaces_previous_value() {
        let transform = DeclinationTransform::new(0.3);
        transform.set_declination(1.2);
        transform.set_declination(-0.4);

        let fresh = DeclinationTransform::new(-0.4);
        let q = some_orientation();
        assert_relative_eq!(transform.apply(&q), fresh.apply(&q), epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_is_applied_on_the_left() {
        let transform = DeclinationTransform::new(FRAC_PI_2);
        let q = some_orientation();
        let expected = UnitQuaternion::from_axis_angle(&nalgebra::Vector3::z_axis(), FRAC_PI_2) * q;
        assert_relative_eq!(transform.apply(&q), expected, epsilon = 1e-12);

        let identity = transform.apply(&UnitQuaternion::identity());
        let (roll, pitch, yaw) = identity.euler_angles();
        assert_relative_eq!(roll, 0.0, epsilon = 1e-12);
        assert_relative_eq!(pitch, 0.0, epsilon = 1e-12);
        assert_relative_eq!(yaw, FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_msg_and_unbounded_angles() {
        let transform = DeclinationTransform::default();
        transform.msg(&Float32 { data: 0.5 });
        assert_relative_eq!(
            transform.rotation().angle(),
            0.5_f32 as f64,
            epsilon = 1e-12
        );

        // 3π is accepted as-is and equals a rotation of π
        transform.set_declination(3.0 * PI);
        assert_relative_eq!(transform.rotation().angle(), PI, epsilon = 1e-9);
    }

    #[test]
    fn test_non_finite_is_ignored() {
        let transform = DeclinationTransform::new(0.2);
        transform.set_declination(f64::NAN);
        transform.msg(&Float32 {
            data: f32::INFINITY,
        });
        assert_relative_eq!(transform.rotation().angle(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_shared_between_threads() {
        let transform = std::sync::Arc::new(DeclinationTransform::default());
        let writer = {
            let transform = transform.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    transform.set_declination(i as f64 * 0.01);
                }
            })
        };
        for _ in 0..100 {
            let q = transform.apply(&UnitQuaternion::identity());
            assert_relative_eq!(q.norm(), 1.0, epsilon = 1e-12);
        }
        writer.join().unwrap();
        assert_relative_eq!(transform.rotation().angle(), 0.99, epsilon = 1e-12);
    }
}
