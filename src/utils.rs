// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! contains useful type definitions and the screw-theory functions shared by kinematics,
//! dynamics and the task-space control modes.
//!
//! Twists and wrenches are 6-vectors with the angular part first, i.e. `[ω, v]` and `[m, f]`.
use nalgebra::{DVector, Matrix3, Matrix4, Matrix6, Vector3, Vector6};
use std::f64::consts::PI;

/// A homogeneous 4x4 transformation matrix
pub type Pose = Matrix4<f64>;
/// A 6-vector `[ω, v]`
pub type Twist = Vector6<f64>;
/// A 6-vector `[m, f]`
pub type Wrench = Vector6<f64>;
/// One value per joint
pub type JointVector = DVector<f64>;

/// Determines whether a scalar is small enough to be treated as zero
pub fn near_zero(z: f64) -> bool {
    z.abs() < 1e-6
}

/// Sign of `x` where zero (of either sign) maps to zero.
///
/// `f64::signum` maps `0.0` to `1.0`, which would turn a resting joint into a moving one for
/// Coulomb friction and direction bits.
pub fn sign(x: f64) -> f64 {
    if x > 0. {
        1.
    } else if x < 0. {
        -1.
    } else {
        0.
    }
}

/// Angular part of a twist or moment part of a wrench.
pub fn angular(v: &Vector6<f64>) -> Vector3<f64> {
    Vector3::new(v[0], v[1], v[2])
}

/// Linear part of a twist or force part of a wrench.
pub fn linear(v: &Vector6<f64>) -> Vector3<f64> {
    Vector3::new(v[3], v[4], v[5])
}

/// Converts a 3-vector to its skew-symmetric so(3) representation
pub fn vec_to_so3(omg: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0., -omg[2], omg[1], //
        omg[2], 0., -omg[0], //
        -omg[1], omg[0], 0.,
    )
}

/// Converts an so(3) matrix back to a 3-vector
pub fn so3_to_vec(so3mat: &Matrix3<f64>) -> Vector3<f64> {
    Vector3::new(so3mat[(2, 1)], so3mat[(0, 2)], so3mat[(1, 0)])
}

/// Converts a twist to its 4x4 se(3) representation
pub fn vec_to_se3(v: &Vector6<f64>) -> Matrix4<f64> {
    let mut se3mat = Matrix4::zeros();
    se3mat
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&vec_to_so3(&angular(v)));
    se3mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&linear(v));
    se3mat
}

/// Converts an se(3) matrix back to a twist
pub fn se3_to_vec(se3mat: &Matrix4<f64>) -> Vector6<f64> {
    Vector6::new(
        se3mat[(2, 1)],
        se3mat[(0, 2)],
        se3mat[(1, 0)],
        se3mat[(0, 3)],
        se3mat[(1, 3)],
        se3mat[(2, 3)],
    )
}

/// Splits a transformation into its rotation matrix and position vector
pub fn trans_to_rp(t: &Matrix4<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    (
        t.fixed_view::<3, 3>(0, 0).into_owned(),
        Vector3::new(t[(0, 3)], t[(1, 3)], t[(2, 3)]),
    )
}

/// Builds a transformation from a rotation matrix and a position vector
pub fn rp_to_trans(r: &Matrix3<f64>, p: &Vector3<f64>) -> Matrix4<f64> {
    let mut t = Matrix4::identity();
    t.fixed_view_mut::<3, 3>(0, 0).copy_from(r);
    t.fixed_view_mut::<3, 1>(0, 3).copy_from(p);
    t
}

/// Inverts a homogeneous transformation using the transpose of its rotation
pub fn trans_inv(t: &Matrix4<f64>) -> Matrix4<f64> {
    let (r, p) = trans_to_rp(t);
    let r_t = r.transpose();
    rp_to_trans(&r_t, &(-(r_t * p)))
}

/// The 6x6 adjoint representation `[Ad_T]` of a transformation
pub fn adjoint(t: &Matrix4<f64>) -> Matrix6<f64> {
    let (r, p) = trans_to_rp(t);
    let mut ad_t = Matrix6::zeros();
    ad_t.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    ad_t.fixed_view_mut::<3, 3>(3, 0)
        .copy_from(&(vec_to_so3(&p) * r));
    ad_t.fixed_view_mut::<3, 3>(3, 3).copy_from(&r);
    ad_t
}

/// The 6x6 matrix `[ad_V]` used for the Lie bracket of two twists
pub fn ad(v: &Vector6<f64>) -> Matrix6<f64> {
    let omgmat = vec_to_so3(&angular(v));
    let mut ad_v = Matrix6::zeros();
    ad_v.fixed_view_mut::<3, 3>(0, 0).copy_from(&omgmat);
    ad_v.fixed_view_mut::<3, 3>(3, 0)
        .copy_from(&vec_to_so3(&linear(v)));
    ad_v.fixed_view_mut::<3, 3>(3, 3).copy_from(&omgmat);
    ad_v
}

/// Matrix exponential of an so(3) matrix (Rodrigues' formula)
pub fn matrix_exp3(so3mat: &Matrix3<f64>) -> Matrix3<f64> {
    let omgtheta = so3_to_vec(so3mat);
    let theta = omgtheta.norm();
    if near_zero(theta) {
        return Matrix3::identity();
    }
    let omgmat = so3mat / theta;
    Matrix3::identity() + omgmat * theta.sin() + (omgmat * omgmat) * (1. - theta.cos())
}

/// Matrix exponential of an se(3) matrix, i.e. the rigid motion obtained by following a
/// screw axis for the encoded distance.
pub fn matrix_exp6(se3mat: &Matrix4<f64>) -> Matrix4<f64> {
    let omgmat_theta: Matrix3<f64> = se3mat.fixed_view::<3, 3>(0, 0).into_owned();
    let v_theta = Vector3::new(se3mat[(0, 3)], se3mat[(1, 3)], se3mat[(2, 3)]);
    let theta = so3_to_vec(&omgmat_theta).norm();
    if near_zero(theta) {
        return rp_to_trans(&Matrix3::identity(), &v_theta);
    }
    let omgmat = omgmat_theta / theta;
    let g = Matrix3::identity() * theta
        + omgmat * (1. - theta.cos())
        + (omgmat * omgmat) * (theta - theta.sin());
    rp_to_trans(&matrix_exp3(&omgmat_theta), &(g * v_theta / theta))
}

/// Matrix logarithm of a rotation matrix
pub fn matrix_log3(r: &Matrix3<f64>) -> Matrix3<f64> {
    let acos_input = (r.trace() - 1.) / 2.;
    if acos_input >= 1. {
        Matrix3::zeros()
    } else if acos_input <= -1. {
        let omg = if !near_zero(1. + r[(2, 2)]) {
            Vector3::new(r[(0, 2)], r[(1, 2)], 1. + r[(2, 2)]) / (2. * (1. + r[(2, 2)])).sqrt()
        } else if !near_zero(1. + r[(1, 1)]) {
            Vector3::new(r[(0, 1)], 1. + r[(1, 1)], r[(2, 1)]) / (2. * (1. + r[(1, 1)])).sqrt()
        } else {
            Vector3::new(1. + r[(0, 0)], r[(1, 0)], r[(2, 0)]) / (2. * (1. + r[(0, 0)])).sqrt()
        };
        vec_to_so3(&(omg * PI))
    } else {
        let theta = acos_input.acos();
        (r - r.transpose()) * (theta / (2. * theta.sin()))
    }
}

/// Matrix logarithm of a homogeneous transformation
pub fn matrix_log6(t: &Matrix4<f64>) -> Matrix4<f64> {
    let (r, p) = trans_to_rp(t);
    let omgmat = matrix_log3(&r);
    if omgmat == Matrix3::zeros() {
        return vec_to_se3(&Vector6::new(0., 0., 0., p[0], p[1], p[2]));
    }
    let theta = ((r.trace() - 1.) / 2.).clamp(-1., 1.).acos();
    let g_inv = Matrix3::identity() - omgmat / 2.
        + (omgmat * omgmat) * ((1. / theta - 1. / (theta / 2.).tan() / 2.) / theta);
    let mut se3mat = Matrix4::zeros();
    se3mat.fixed_view_mut::<3, 3>(0, 0).copy_from(&omgmat);
    se3mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&(g_inv * p));
    se3mat
}

/// Determines whether the given matrix represents a valid homogeneous transformation.
#[allow(clippy::float_cmp)]
pub fn is_homogeneous_transformation(transform: &Matrix4<f64>) -> bool {
    const ORTHONORMAL_THRESHOLD: f64 = 1e-5;
    if transform.iter().any(|x| !x.is_finite()) {
        return false;
    }
    if transform[(3, 0)] != 0.0
        || transform[(3, 1)] != 0.0
        || transform[(3, 2)] != 0.0
        || transform[(3, 3)] != 1.0
    {
        return false;
    }
    let (r, _) = trans_to_rp(transform);
    for j in 0..3 {
        if (r.column(j).norm() - 1.).abs() > ORTHONORMAL_THRESHOLD
            || (r.row(j).norm() - 1.).abs() > ORTHONORMAL_THRESHOLD
        {
            return false;
        }
    }
    r.determinant() > 0.
}
