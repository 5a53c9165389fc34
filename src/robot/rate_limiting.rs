// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains functions for limiting commanded joint velocities and end effector twists.
use crate::utils::{angular, linear, JointVector, Twist};
use nalgebra::Vector3;

/// Epsilon value for limiting or not
pub static NORM_EPS: f64 = f64::EPSILON;

/// Scales joint velocities uniformly so that no joint exceeds `max_velocity`. The direction of
/// the motion in joint space is kept.
/// # Panics
/// * if `max_velocity` is negative or NaN
pub fn limit_joint_velocities(velocities: &JointVector, max_velocity: f64) -> JointVector {
    assert!(max_velocity >= 0.);
    let largest = velocities.amax();
    if largest > max_velocity && largest > NORM_EPS {
        velocities * (max_velocity / largest)
    } else {
        velocities.clone()
    }
}

fn limit_norm(v: Vector3<f64>, max_norm: f64) -> Vector3<f64> {
    let norm = v.norm();
    if norm > max_norm && norm > NORM_EPS {
        v * (max_norm / norm)
    } else {
        v
    }
}

/// Limits the angular part of a twist to `max_rotational_velocity` and the linear part to
/// `max_translational_velocity`, each keeping its direction.
/// # Panics
/// * if one of the limits is negative or NaN
pub fn limit_twist(
    twist: &Twist,
    max_translational_velocity: f64,
    max_rotational_velocity: f64,
) -> Twist {
    assert!(max_translational_velocity >= 0. && max_rotational_velocity >= 0.);
    let w = limit_norm(angular(twist), max_rotational_velocity);
    let v = limit_norm(linear(twist), max_translational_velocity);
    Twist::new(w[0], w[1], w[2], v[0], v[1], v[2])
}

#[cfg(test)]
mod tests {
    use crate::robot::rate_limiting::{limit_joint_velocities, limit_twist};
    use crate::utils::{JointVector, Twist};

    #[test]
    fn joint_velocities_keep_direction() {
        let limited = limit_joint_velocities(&JointVector::from_vec(vec![1., -2., 0.5]), 0.5);
        assert_eq!(limited, JointVector::from_vec(vec![0.25, -0.5, 0.125]));
        let slow = JointVector::from_vec(vec![0.1, -0.2]);
        assert_eq!(limit_joint_velocities(&slow, 0.5), slow);
        assert_eq!(
            limit_joint_velocities(&JointVector::zeros(3), 0.),
            JointVector::zeros(3)
        );
    }

    #[test]
    fn twist_parts_are_limited_independently() {
        let twist = Twist::new(0., 3., 4., 0.03, 0., 0.);
        let limited = limit_twist(&twist, 0.05, 0.5);
        assert!((limited[1] - 0.3).abs() < 1e-12);
        assert!((limited[2] - 0.4).abs() < 1e-12);
        assert_eq!(limited[3], 0.03);
        let fast = limit_twist(&Twist::new(0., 0., 0., 0., 0., -1.), 0.05, 0.5);
        assert!((fast[5] + 0.05).abs() < 1e-12);
    }
}
