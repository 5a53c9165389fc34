// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the mathematical model of the arm: joints, links and screw axes.
//!
//! The model is loaded once and never mutated afterwards. Kinematics and dynamics are free
//! functions in the [`kinematics`] and [`dynamics`] submodules which take the model by
//! reference, so both always use the same screw axes and therefore the same sign convention.
use crate::exception::{check_dimension, create_input_error, PegasusException};
use crate::utils::{is_homogeneous_transformation, sign, Pose, Twist};
use crate::PegasusResult;
use nalgebra::{Matrix4, Matrix6, Vector3};
use serde::Deserialize;
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub mod dynamics;
pub mod kinematics;

/// Default efficiency of one gear stage.
pub const DEFAULT_GEAR_EFFICIENCY: f64 = 0.9;

/// Coulomb and viscous friction of a joint, expressed at the joint side of the gearbox.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize)]
pub struct Friction {
    /// Coulomb friction torque in \[Nm\]
    pub coulomb: f64,
    /// Viscous friction coefficient in \[Nms/rad\]
    pub viscous: f64,
}

impl Friction {
    /// Torque needed to overcome friction at the given joint velocity. A joint at rest needs
    /// no friction torque.
    pub fn torque(&self, velocity: f64) -> f64 {
        self.coulomb * sign(velocity) + self.viscous * velocity
    }
}

/// Drive train of a single joint.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Joint {
    gear_ratio: f64,
    km: f64,
    efficiency: f64,
    friction: Option<Friction>,
}

impl Joint {
    /// Creates a joint.
    /// # Arguments
    /// * `gear_ratio` - reduction of the gearbox, has to be positive
    /// * `km` - motor torque constant in \[Nm/A\], has to be positive
    /// * `efficiency` - efficiency of one gear stage in (0, 1]
    /// * `friction` - optional friction model
    /// # Errors
    /// * [`InputValidationError`](`crate::exception::PegasusException::InputValidationError`)
    /// if one of the constants is out of range.
    pub fn new(
        gear_ratio: f64,
        km: f64,
        efficiency: f64,
        friction: Option<Friction>,
    ) -> PegasusResult<Joint> {
        if !(gear_ratio > 0. && gear_ratio.is_finite()) {
            return Err(create_input_error(format!(
                "gear ratio has to be positive, got {}",
                gear_ratio
            )));
        }
        if !(km > 0. && km.is_finite()) {
            return Err(create_input_error(format!(
                "torque constant has to be positive, got {}",
                km
            )));
        }
        if !(efficiency > 0. && efficiency <= 1.) {
            return Err(create_input_error(format!(
                "gear efficiency has to be in (0, 1], got {}",
                efficiency
            )));
        }
        Ok(Joint {
            gear_ratio,
            km,
            efficiency,
            friction,
        })
    }
    pub fn gear_ratio(&self) -> f64 {
        self.gear_ratio
    }
    pub fn km(&self) -> f64 {
        self.km
    }
    pub fn efficiency(&self) -> f64 {
        self.efficiency
    }
    pub fn friction(&self) -> Option<&Friction> {
        self.friction.as_ref()
    }
}

/// Inertial description of one link.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Link {
    /// Pose of this link's center of mass frame relative to the previous one at home
    /// configuration (`M_{i-1,i}`).
    pub frame: Pose,
    /// Spatial inertia matrix `G_i` expressed in the center of mass frame, rotational part first.
    pub spatial_inertia: Matrix6<f64>,
}

impl Link {
    /// Creates a link from its mass and the principal moments of inertia about its center of
    /// mass frame.
    pub fn from_mass(frame: Pose, mass: f64, principal_inertia: Vector3<f64>) -> PegasusResult<Link> {
        if !(mass >= 0.) || principal_inertia.iter().any(|i| !(*i >= 0.)) {
            return Err(create_input_error(
                "link mass and inertia have to be non-negative",
            ));
        }
        let mut spatial_inertia = Matrix6::zeros();
        for i in 0..3 {
            spatial_inertia[(i, i)] = principal_inertia[i];
            spatial_inertia[(i + 3, i + 3)] = mass;
        }
        Ok(Link {
            frame,
            spatial_inertia,
        })
    }
}

/// Selects how the model treats joint friction.
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum RobotVariant {
    /// Coulomb and viscous friction is part of the feedforward torque.
    Friction = 0,
    /// Frictionless model.
    Ideal = 1,
}

impl fmt::Display for RobotVariant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RobotVariant::Friction => write!(f, "friction"),
            RobotVariant::Ideal => write!(f, "ideal"),
        }
    }
}

impl FromStr for RobotVariant {
    type Err = PegasusException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "0" | "friction" => Ok(RobotVariant::Friction),
            "1" | "ideal" => Ok(RobotVariant::Ideal),
            other => Err(create_input_error(format!(
                "unknown robot variant {:?}, expected 0 (friction) or 1 (ideal)",
                other
            ))),
        }
    }
}

/// Serial chain described by screw axes in the space frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Robot {
    joints: Vec<Joint>,
    tsb_home: Pose,
    screw_axes: Vec<Twist>,
    links: Vec<Link>,
    ee_frame: Pose,
}

impl Robot {
    /// Creates a robot model.
    /// # Arguments
    /// * `joints` - drive trains, one per joint
    /// * `tsb_home` - end effector pose in the space frame when all joint angles are zero
    /// * `screw_axes` - screw axis of every joint in the space frame at home configuration
    /// * `links` - inertial data, one per joint
    /// * `ee_frame` - end effector frame relative to the last link frame
    /// # Errors
    /// * [`DimensionMismatch`](`crate::exception::PegasusException::DimensionMismatch`) if the
    /// number of screw axes or links differs from the number of joints.
    /// * [`InputValidationError`](`crate::exception::PegasusException::InputValidationError`) if
    /// one of the frames is not a homogeneous transformation.
    pub fn new(
        joints: Vec<Joint>,
        tsb_home: Pose,
        screw_axes: Vec<Twist>,
        links: Vec<Link>,
        ee_frame: Pose,
    ) -> PegasusResult<Robot> {
        if joints.is_empty() {
            return Err(create_input_error("a robot needs at least one joint"));
        }
        check_dimension(joints.len(), screw_axes.len())?;
        check_dimension(joints.len(), links.len())?;
        if !is_homogeneous_transformation(&tsb_home) || !is_homogeneous_transformation(&ee_frame)
        {
            return Err(create_input_error(
                "home and end effector frames have to be homogeneous transformations",
            ));
        }
        if let Some(i) = links
            .iter()
            .position(|link| !is_homogeneous_transformation(&link.frame))
        {
            return Err(create_input_error(format!(
                "frame of link {} is not a homogeneous transformation",
                i + 1
            )));
        }
        if screw_axes.iter().any(|s| s.iter().any(|x| !x.is_finite())) {
            return Err(create_input_error("screw axes have to be finite"));
        }
        Ok(Robot {
            joints,
            tsb_home,
            screw_axes,
            links,
            ee_frame,
        })
    }

    /// Loads a robot description from a TOML file. See [`RobotDescription`] for the format.
    pub fn load<P: AsRef<Path>>(path: P) -> PegasusResult<Robot> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| PegasusException::ConfigException {
            message: format!("cannot read robot description {}: {}", path.display(), e),
        })?;
        Robot::from_toml_str(&text)
    }

    /// Parses a robot description in TOML format.
    pub fn from_toml_str(text: &str) -> PegasusResult<Robot> {
        let description: RobotDescription =
            toml::from_str(text).map_err(|e| PegasusException::ConfigException {
                message: format!("invalid robot description: {}", e),
            })?;
        description.build()
    }

    /// number of joints
    pub fn dof(&self) -> usize {
        self.joints.len()
    }
    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }
    pub fn tsb_home(&self) -> &Pose {
        &self.tsb_home
    }
    pub fn screw_axes(&self) -> &[Twist] {
        &self.screw_axes
    }
    pub fn links(&self) -> &[Link] {
        &self.links
    }
    pub fn ee_frame(&self) -> &Pose {
        &self.ee_frame
    }

    /// Copy of this model where no joint has friction.
    pub fn without_friction(&self) -> Robot {
        let mut robot = self.clone();
        for joint in robot.joints.iter_mut() {
            joint.friction = None;
        }
        robot
    }

    /// Returns the model for the selected variant.
    pub fn variant(&self, variant: RobotVariant) -> Robot {
        match variant {
            RobotVariant::Friction => self.clone(),
            RobotVariant::Ideal => self.without_friction(),
        }
    }
}

/// Row-major 4x4 matrix as written in description files.
pub type MatrixRows = [[f64; 4]; 4];

fn matrix_from_rows(rows: &MatrixRows) -> Matrix4<f64> {
    Matrix4::from_fn(|r, c| rows[r][c])
}

/// On-disk description of a robot.
///
/// ```toml
/// home = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.6], [0.0, 0.0, 0.0, 1.0]]
/// ee_frame = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.04], [0.0, 0.0, 0.0, 1.0]]
///
/// [[joints]]
/// screw_axis = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0]
/// gear_ratio = 100.0
/// km = 0.05
/// friction = { coulomb = 0.1, viscous = 0.05 }
/// link = { frame = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.05], [0.0, 0.0, 0.0, 1.0]], mass = 1.0, inertia = [0.01, 0.01, 0.01] }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RobotDescription {
    pub home: MatrixRows,
    pub ee_frame: MatrixRows,
    pub joints: Vec<JointDescription>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JointDescription {
    pub screw_axis: [f64; 6],
    pub gear_ratio: f64,
    pub km: f64,
    #[serde(default = "default_efficiency")]
    pub efficiency: f64,
    #[serde(default)]
    pub friction: Option<Friction>,
    pub link: LinkDescription,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkDescription {
    pub frame: MatrixRows,
    pub mass: f64,
    /// principal moments of inertia about the center of mass frame
    pub inertia: [f64; 3],
}

fn default_efficiency() -> f64 {
    DEFAULT_GEAR_EFFICIENCY
}

impl RobotDescription {
    /// Validates the description and creates the model.
    pub fn build(&self) -> PegasusResult<Robot> {
        let mut joints = Vec::with_capacity(self.joints.len());
        let mut screw_axes = Vec::with_capacity(self.joints.len());
        let mut links = Vec::with_capacity(self.joints.len());
        for joint in &self.joints {
            joints.push(Joint::new(
                joint.gear_ratio,
                joint.km,
                joint.efficiency,
                joint.friction,
            )?);
            screw_axes.push(Twist::from_column_slice(&joint.screw_axis));
            links.push(Link::from_mass(
                matrix_from_rows(&joint.link.frame),
                joint.link.mass,
                Vector3::from_column_slice(&joint.link.inertia),
            )?);
        }
        Robot::new(
            joints,
            matrix_from_rows(&self.home),
            screw_axes,
            links,
            matrix_from_rows(&self.ee_frame),
        )
    }
}

/// Five joint arm used throughout the unit tests: a base yaw, three parallel pitch joints and
/// a wrist roll, all links stacked along z.
#[cfg(test)]
pub(crate) fn test_arm(friction: Option<Friction>) -> Robot {
    let translation = |z: f64| {
        let mut t = Matrix4::identity();
        t[(2, 3)] = z;
        t
    };
    let joints = vec![Joint::new(100., 0.05, DEFAULT_GEAR_EFFICIENCY, friction).unwrap(); 5];
    let screw_axes = vec![
        Twist::new(0., 0., 1., 0., 0., 0.),
        Twist::new(0., 1., 0., -0.1, 0., 0.),
        Twist::new(0., 1., 0., -0.3, 0., 0.),
        Twist::new(0., 1., 0., -0.5, 0., 0.),
        Twist::new(0., 0., 1., 0., 0., 0.),
    ];
    let links = [
        (0.05, 1.0),
        (0.15, 0.8),
        (0.2, 0.6),
        (0.12, 0.3),
        (0.04, 0.2),
    ]
    .iter()
    .map(|(z, m)| Link::from_mass(translation(*z), *m, Vector3::new(0.01, 0.01, 0.005)).unwrap())
    .collect();
    Robot::new(joints, translation(0.6), screw_axes, links, translation(0.04)).unwrap()
}

#[cfg(test)]
mod tests {
    use crate::exception::PegasusException;
    use crate::model::{test_arm, Friction, Joint, Robot, RobotVariant};
    use crate::utils::Twist;
    use nalgebra::Matrix4;

    const DESCRIPTION: &str = r#"
home = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.3], [0.0, 0.0, 0.0, 1.0]]
ee_frame = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.1], [0.0, 0.0, 0.0, 1.0]]

[[joints]]
screw_axis = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0]
gear_ratio = 50.0
km = 0.02
friction = { coulomb = 0.1, viscous = 0.01 }
link = { frame = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.1], [0.0, 0.0, 0.0, 1.0]], mass = 0.5, inertia = [0.001, 0.001, 0.001] }

[[joints]]
screw_axis = [0.0, 1.0, 0.0, -0.1, 0.0, 0.0]
gear_ratio = 50.0
km = 0.02
efficiency = 0.8
link = { frame = [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.1], [0.0, 0.0, 0.0, 1.0]], mass = 0.5, inertia = [0.001, 0.001, 0.001] }
"#;

    #[test]
    fn robot_description_is_parsed() {
        let robot = Robot::from_toml_str(DESCRIPTION).unwrap();
        assert_eq!(robot.dof(), 2);
        assert_eq!(robot.tsb_home()[(2, 3)], 0.3);
        assert_eq!(robot.joints()[0].efficiency(), 0.9);
        assert_eq!(robot.joints()[1].efficiency(), 0.8);
        assert!(robot.joints()[1].friction().is_none());
        assert_eq!(robot.links()[1].spatial_inertia[(4, 4)], 0.5);
        let ideal = robot.variant(RobotVariant::Ideal);
        assert!(ideal.joints().iter().all(|j| j.friction().is_none()));
        assert!(robot
            .variant(RobotVariant::Friction)
            .joints()[0]
            .friction()
            .is_some());
    }

    #[test]
    fn screw_axes_have_to_match_joints() {
        let arm = test_arm(None);
        let result = Robot::new(
            arm.joints().to_vec(),
            *arm.tsb_home(),
            arm.screw_axes()[..4].to_vec(),
            arm.links().to_vec(),
            *arm.ee_frame(),
        );
        match result {
            Err(PegasusException::DimensionMismatch { expected, found }) => {
                assert_eq!(expected, 5);
                assert_eq!(found, 4);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn home_has_to_be_rigid() {
        let arm = test_arm(None);
        let mut home = Matrix4::identity();
        home[(0, 0)] = 3.;
        assert!(Robot::new(
            arm.joints().to_vec(),
            home,
            vec![Twist::zeros(); 5],
            arm.links().to_vec(),
            *arm.ee_frame(),
        )
        .is_err());
    }

    #[test]
    fn joint_constants_are_validated() {
        assert!(Joint::new(0., 0.1, 0.9, None).is_err());
        assert!(Joint::new(10., -0.1, 0.9, None).is_err());
        assert!(Joint::new(10., 0.1, 1.5, None).is_err());
        assert!(Joint::new(10., 0.1, 1.0, None).is_ok());
    }

    #[test]
    fn friction_vanishes_at_rest() {
        let friction = Friction {
            coulomb: 0.2,
            viscous: 0.5,
        };
        assert_eq!(friction.torque(0.), 0.);
        assert!((friction.torque(2.) - 1.2).abs() < 1e-12);
        assert!((friction.torque(-2.) + 1.2).abs() < 1e-12);
    }

    #[test]
    fn variant_selection_by_number() {
        assert_eq!("0".parse::<RobotVariant>().unwrap(), RobotVariant::Friction);
        assert_eq!(" 1 ".parse::<RobotVariant>().unwrap(), RobotVariant::Ideal);
        assert!("2".parse::<RobotVariant>().is_err());
    }
}
