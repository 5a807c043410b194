//! 全局类型转换
//!
//! 消息类型与 nalgebra 类型之间的转换
//!

use nalgebra::{Isometry3, Translation3, UnitQuaternion};

use crate::msgs;

/// 不做归一化，由调用方检查 [nalgebra::Quaternion::norm]
impl From<&msgs::Quaternion> for nalgebra::Quaternion<f64> {
    fn from(q: &msgs::Quaternion) -> Self {
        nalgebra::Quaternion::new(q.w, q.x, q.y, q.z)
    }
}

impl From<&UnitQuaternion<f64>> for msgs::Quaternion {
    fn from(q: &UnitQuaternion<f64>) -> Self {
        Self {
            x: q.i,
            y: q.j,
            z: q.k,
            w: q.w,
        }
    }
}

impl From<&msgs::Vector3> for nalgebra::Vector3<f64> {
    fn from(v: &msgs::Vector3) -> Self {
        nalgebra::Vector3::new(v.x, v.y, v.z)
    }
}

impl From<&nalgebra::Vector3<f64>> for msgs::Vector3 {
    fn from(v: &nalgebra::Vector3<f64>) -> Self {
        Self {
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }
}

/// 组合平移和旋转为 [Isometry3]，旋转会被归一化
impl From<&msgs::Transform> for Isometry3<f64> {
    fn from(t: &msgs::Transform) -> Self {
        let translation = Translation3::new(t.translation.x, t.translation.y, t.translation.z);
        let rotation = UnitQuaternion::new_normalize((&t.rotation).into());
        Isometry3::from_parts(translation, rotation)
    }
}

#[test]
fn test_quaternion_cast() {
    let yaw = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.3);
    let msg = msgs::Quaternion::from(&yaw);
    assert_eq!(msg.w, yaw.w);
    assert_eq!(msg.z, yaw.k);
    let back: nalgebra::Quaternion<f64> = (&msg).into();
    assert_eq!(back, *yaw.quaternion());
}

#[test]
fn test_isometry3() {
    let t = msgs::Transform {
        translation: msgs::Vector3::new(1.0, 2.0, 3.0),
        rotation: msgs::Quaternion {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 2.0,
        },
    };
    let iso = Isometry3::from(&t);
    assert_eq!(iso.translation.vector, nalgebra::Vector3::new(1.0, 2.0, 3.0));
    assert_eq!(iso.rotation, UnitQuaternion::identity());
    println!("isometry: {}", iso.to_matrix());
}
