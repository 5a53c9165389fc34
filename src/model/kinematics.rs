// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Forward kinematics and the space Jacobian by product of exponentials.
use crate::exception::check_dimension;
use crate::utils::{adjoint, matrix_exp6, vec_to_se3, JointVector, Pose, Twist};
use crate::PegasusResult;
use nalgebra::{DMatrix, Matrix4};

/// Computes the end effector pose in the space frame
/// `T = e^[S1]θ1 · e^[S2]θ2 · … · e^[SN]θN · TsbHome`.
///
/// # Arguments
/// * `tsb_home` - end effector pose at home configuration
/// * `screw_axes` - screw axes of the joints in the space frame
/// * `theta` - joint angles in \[rad\]
/// # Errors
/// * [`DimensionMismatch`](`crate::exception::PegasusException::DimensionMismatch`) if the
/// number of joint angles differs from the number of screw axes.
pub fn fk_space(tsb_home: &Pose, screw_axes: &[Twist], theta: &JointVector) -> PegasusResult<Pose> {
    check_dimension(screw_axes.len(), theta.len())?;
    let mut t = Matrix4::identity();
    for (screw, angle) in screw_axes.iter().zip(theta.iter()) {
        t *= matrix_exp6(&vec_to_se3(&(screw * *angle)));
    }
    Ok(t * tsb_home)
}

/// Computes the 6xN space Jacobian. Column `i` is the screw axis of joint `i` displaced by
/// the motion of the joints before it.
pub fn jacobian_space(screw_axes: &[Twist], theta: &JointVector) -> PegasusResult<DMatrix<f64>> {
    check_dimension(screw_axes.len(), theta.len())?;
    let mut jacobian = DMatrix::zeros(6, screw_axes.len());
    let mut t = Matrix4::identity();
    for (i, screw) in screw_axes.iter().enumerate() {
        if i > 0 {
            t *= matrix_exp6(&vec_to_se3(&(screw_axes[i - 1] * theta[i - 1])));
        }
        jacobian.column_mut(i).copy_from(&(adjoint(&t) * screw));
    }
    Ok(jacobian)
}

#[cfg(test)]
mod tests {
    use crate::exception::PegasusException;
    use crate::model::kinematics::{fk_space, jacobian_space};
    use crate::model::test_arm;
    use crate::utils::{JointVector, Twist};
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn home_at_zero_angles() {
        let arm = test_arm(None);
        let pose = fk_space(arm.tsb_home(), arm.screw_axes(), &JointVector::zeros(5)).unwrap();
        assert_eq!(&pose, arm.tsb_home());
    }

    #[test]
    fn fk_is_deterministic() {
        let arm = test_arm(None);
        let theta = JointVector::from_vec(vec![0.3, -1.1, 0.7, 2.2, -0.4]);
        let a = fk_space(arm.tsb_home(), arm.screw_axes(), &theta).unwrap();
        let b = fk_space(arm.tsb_home(), arm.screw_axes(), &theta).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn shoulder_pitch_swings_arm_forward() {
        let arm = test_arm(None);
        let theta = JointVector::from_vec(vec![0., FRAC_PI_2, 0., 0., 0.]);
        let pose = fk_space(arm.tsb_home(), arm.screw_axes(), &theta).unwrap();
        assert!((pose[(0, 3)] - 0.5).abs() < 1e-9);
        assert!(pose[(1, 3)].abs() < 1e-9);
        assert!((pose[(2, 3)] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn wrong_number_of_angles() {
        let arm = test_arm(None);
        match fk_space(arm.tsb_home(), arm.screw_axes(), &JointVector::zeros(4)) {
            Err(PegasusException::DimensionMismatch { expected, found }) => {
                assert_eq!((expected, found), (5, 4));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let arm = test_arm(None);
        let theta = JointVector::from_vec(vec![0.2, 0.4, -0.3, 0.5, 0.1]);
        let jacobian = jacobian_space(arm.screw_axes(), &theta).unwrap();
        assert_eq!(
            Twist::from_iterator(jacobian.column(0).iter().cloned()),
            Twist::new(0., 0., 1., 0., 0., 0.)
        );
        // the linear velocity of the point at the space origin, compare against the motion of
        // the end effector position: v_tip = v_s + ω_s × p
        let h = 1e-7;
        let pose = fk_space(arm.tsb_home(), arm.screw_axes(), &theta).unwrap();
        let p = pose.fixed_view::<3, 1>(0, 3).into_owned();
        for i in 0..5 {
            let mut shifted = theta.clone();
            shifted[i] += h;
            let next = fk_space(arm.tsb_home(), arm.screw_axes(), &shifted).unwrap();
            let dp = (next.fixed_view::<3, 1>(0, 3).into_owned() - p) / h;
            let w = jacobian.fixed_view::<3, 1>(0, i).into_owned();
            let v = jacobian.fixed_view::<3, 1>(3, i).into_owned();
            let expected = v + w.cross(&p);
            assert!((dp - expected).norm() < 1e-5, "column {}", i);
        }
    }
}
