// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Inverse dynamics by recursive Newton-Euler over the link chain.
use crate::exception::check_dimension;
use crate::model::Robot;
use crate::utils::{ad, adjoint, matrix_exp6, trans_inv, vec_to_se3, JointVector, Wrench};
use crate::PegasusResult;
use nalgebra::{Matrix4, Matrix6, Vector3, Vector6};

/// Computes the joint torques of a frictionless chain for the given motion.
///
/// # Arguments
/// * `robot` - robot model, its screw axes are the ones used by
/// [`fk_space`](`crate::model::kinematics::fk_space`)
/// * `theta` - joint angles in \[rad\]
/// * `dtheta` - joint velocities in \[rad/s\]
/// * `ddtheta` - joint accelerations in \[rad/s^2\]
/// * `gravity` - gravity vector in the space frame in \[m/s^2\]
/// * `f_tip` - wrench the end effector applies to the environment, expressed in the end
/// effector frame
/// # Errors
/// * [`DimensionMismatch`](`crate::exception::PegasusException::DimensionMismatch`) if one of
/// the joint vectors does not have one value per joint.
pub fn inverse_dynamics(
    robot: &Robot,
    theta: &JointVector,
    dtheta: &JointVector,
    ddtheta: &JointVector,
    gravity: &Vector3<f64>,
    f_tip: &Wrench,
) -> PegasusResult<JointVector> {
    let n = robot.dof();
    check_dimension(n, theta.len())?;
    check_dimension(n, dtheta.len())?;
    check_dimension(n, ddtheta.len())?;

    let links = robot.links();
    let mut m_i: Matrix4<f64> = Matrix4::identity();
    let mut screws: Vec<Vector6<f64>> = Vec::with_capacity(n);
    // ad_t[i] maps quantities of frame i into frame i+1, ad_t[n] is the end effector frame
    let mut ad_t: Vec<Matrix6<f64>> = vec![Matrix6::zeros(); n + 1];
    let mut twists: Vec<Vector6<f64>> = vec![Vector6::zeros(); n + 1];
    let mut accelerations: Vec<Vector6<f64>> = vec![Vector6::zeros(); n + 1];
    // the base accelerates upwards instead of every link feeling gravity
    accelerations[0] = Vector6::new(0., 0., 0., -gravity[0], -gravity[1], -gravity[2]);
    ad_t[n] = adjoint(&trans_inv(robot.ee_frame()));

    for i in 0..n {
        m_i *= links[i].frame;
        let a_i = adjoint(&trans_inv(&m_i)) * robot.screw_axes()[i];
        ad_t[i] = adjoint(&(matrix_exp6(&vec_to_se3(&(a_i * -theta[i]))) * trans_inv(&links[i].frame)));
        twists[i + 1] = ad_t[i] * twists[i] + a_i * dtheta[i];
        accelerations[i + 1] = ad_t[i] * accelerations[i]
            + a_i * ddtheta[i]
            + ad(&twists[i + 1]) * a_i * dtheta[i];
        screws.push(a_i);
    }

    let mut tau = JointVector::zeros(n);
    let mut wrench = *f_tip;
    for i in (0..n).rev() {
        let g_i = &links[i].spatial_inertia;
        wrench = ad_t[i + 1].transpose() * wrench + g_i * accelerations[i + 1]
            - ad(&twists[i + 1]).transpose() * (g_i * twists[i + 1]);
        tau[i] = wrench.dot(&screws[i]);
    }
    Ok(tau)
}

/// Computes the feedforward torque: rigid body dynamics plus the friction of every joint that
/// has a friction model, evaluated at the desired joint velocity.
///
/// With zero velocity, zero acceleration, zero gravity and zero tip wrench the result is
/// exactly zero.
pub fn feed_forward(
    robot: &Robot,
    theta: &JointVector,
    dtheta: &JointVector,
    ddtheta: &JointVector,
    gravity: &Vector3<f64>,
    f_tip: &Wrench,
) -> PegasusResult<JointVector> {
    let mut tau = inverse_dynamics(robot, theta, dtheta, ddtheta, gravity, f_tip)?;
    for (i, joint) in robot.joints().iter().enumerate() {
        if let Some(friction) = joint.friction() {
            tau[i] += friction.torque(dtheta[i]);
        }
    }
    Ok(tau)
}
