//! Contact records and the transform into actuated-link-local frames.

use nalgebra::{Point3, Vector3};
use pliant_core::ModelError;
use pliant_robot::{JointPositions, KinematicModel};

/// Distance of the sentinel "no contact" entry.
pub const NO_CONTACT_DISTANCE: f64 = 100.0;

/// What the contact link touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactBody {
    /// Another link of the same robot (a self contact).
    Robot,
    /// An external object or another body, by id.
    External(String),
}

/// One raw contact as delivered by the collision checker, per tick.
///
/// `position_on_a` is in `link_a`'s frame; `position_on_b` and `normal` are
/// in the robot root frame for external contacts and in `link_b`'s frame for
/// self contacts.
#[derive(Debug, Clone)]
pub struct ContactRecord {
    pub link_a: String,
    pub body_b: ContactBody,
    pub link_b: String,
    pub position_on_a: Point3<f64>,
    pub position_on_b: Point3<f64>,
    pub normal: Vector3<f64>,
    pub distance: f64,
}

/// An external contact re-expressed for constraint consumption.
///
/// Produced by [`transform_external`]; immutable afterward.
#[derive(Debug, Clone)]
pub struct ExternalContact {
    /// Child link of the controlling joint (the nearest actuated ancestor
    /// of the raw contact link).
    pub link: String,
    pub controlling_joint: String,
    /// Contact point on the robot, in `link`'s frame.
    pub position_on_a_in_a: Point3<f64>,
    /// Contact point on the obstacle, in the robot root frame.
    pub position_on_b_in_root: Point3<f64>,
    /// Contact normal (pointing from B toward A), in the robot root frame.
    pub normal_in_root: Vector3<f64>,
    pub distance: f64,
}

impl ExternalContact {
    pub fn no_contact() -> Self {
        Self {
            link: String::new(),
            controlling_joint: String::new(),
            position_on_a_in_a: Point3::origin(),
            position_on_b_in_root: Point3::origin(),
            normal_in_root: Vector3::z(),
            distance: NO_CONTACT_DISTANCE,
        }
    }
}

/// A self contact re-expressed between the two controlled links.
#[derive(Debug, Clone)]
pub struct SelfContact {
    /// Controlled link pair, sorted so `link_a < link_b`.
    pub link_a: String,
    pub link_b: String,
    pub position_on_a_in_a: Point3<f64>,
    pub position_on_b_in_b: Point3<f64>,
    pub normal_in_b: Vector3<f64>,
    pub distance: f64,
}

impl SelfContact {
    pub fn no_contact() -> Self {
        Self {
            link_a: String::new(),
            link_b: String::new(),
            position_on_a_in_a: Point3::origin(),
            position_on_b_in_b: Point3::origin(),
            normal_in_b: Vector3::z(),
            distance: NO_CONTACT_DISTANCE,
        }
    }
}

/// Re-express an external contact in the controlling link's frame.
pub fn transform_external(
    model: &dyn KinematicModel,
    positions: &JointPositions,
    record: &ContactRecord,
) -> Result<ExternalContact, ModelError> {
    let controlling_joint = model.controlling_joint(&record.link_a)?.to_string();
    let link = model.child_link(&controlling_joint)?.to_string();
    let link_t_a = model.fk_numeric(positions, &link, &record.link_a)?;
    Ok(ExternalContact {
        position_on_a_in_a: link_t_a * record.position_on_a,
        position_on_b_in_root: record.position_on_b,
        normal_in_root: record.normal,
        distance: record.distance,
        link,
        controlling_joint,
    })
}

/// Re-express a self contact between its two controlled links.
///
/// Both raw links are reduced to the child of their controlling joint and
/// the pair is sorted; positions and the normal follow their links.
pub fn transform_self(
    model: &dyn KinematicModel,
    positions: &JointPositions,
    record: &ContactRecord,
) -> Result<SelfContact, ModelError> {
    let new_a = model
        .child_link(model.controlling_joint(&record.link_a)?)?
        .to_string();
    let new_b = model
        .child_link(model.controlling_joint(&record.link_b)?)?
        .to_string();

    let a_t_a = model.fk_numeric(positions, &new_a, &record.link_a)?;
    let b_t_b = model.fk_numeric(positions, &new_b, &record.link_b)?;
    let position_on_a_in_a = a_t_a * record.position_on_a;
    let position_on_b_in_b = b_t_b * record.position_on_b;
    let normal_in_b = b_t_b.rotation * record.normal;

    if new_a <= new_b {
        Ok(SelfContact {
            link_a: new_a,
            link_b: new_b,
            position_on_a_in_a,
            position_on_b_in_b,
            normal_in_b,
            distance: record.distance,
        })
    } else {
        // Swap sides so the key is always the sorted pair. The flipped
        // normal now lives in the other link's frame and must be rotated
        // over.
        let a_t_b = model.fk_numeric(positions, &new_a, &new_b)?;
        Ok(SelfContact {
            link_a: new_b,
            link_b: new_a,
            position_on_a_in_a: position_on_b_in_b,
            position_on_b_in_b: position_on_a_in_a,
            normal_in_b: a_t_b.rotation * -normal_in_b,
            distance: record.distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Isometry3;
    use pliant_robot::{JointSpec, SerialChainModel};

    fn arm() -> SerialChainModel {
        SerialChainModel::new(
            "arm",
            "base",
            vec![
                JointSpec::revolute(
                    "shoulder",
                    "upper_arm",
                    Isometry3::translation(0.0, 0.0, 0.1),
                    Vector3::y(),
                ),
                JointSpec::fixed(
                    "bracket",
                    "bracket_link",
                    Isometry3::translation(0.0, 0.0, 0.2),
                ),
            ],
        )
    }

    #[test]
    fn external_contact_reduces_to_controlled_link() {
        let model = arm();
        let positions: JointPositions = [("shoulder".to_string(), 0.0)].into_iter().collect();
        // Contact on the fixed bracket link must be attributed to upper_arm.
        let record = ContactRecord {
            link_a: "bracket_link".into(),
            body_b: ContactBody::External("table".into()),
            link_b: "table_top".into(),
            position_on_a: Point3::new(0.0, 0.0, 0.05),
            position_on_b: Point3::new(0.5, 0.0, 0.0),
            normal: Vector3::x(),
            distance: 0.04,
        };
        let contact = transform_external(&model, &positions, &record).unwrap();
        assert_eq!(contact.link, "upper_arm");
        assert_eq!(contact.controlling_joint, "shoulder");
        // bracket_link sits 0.2 above upper_arm, so the point gains the offset.
        assert_relative_eq!(contact.position_on_a_in_a.z, 0.25, epsilon = 1e-12);
        assert_relative_eq!(contact.distance, 0.04);
    }

    #[test]
    fn self_contact_pair_is_sorted() {
        let model = SerialChainModel::new(
            "arm",
            "base",
            vec![
                JointSpec::revolute(
                    "j1",
                    "link_c",
                    Isometry3::identity(),
                    Vector3::y(),
                ),
                JointSpec::revolute(
                    "j2",
                    "link_a",
                    Isometry3::translation(0.0, 0.0, 0.3),
                    Vector3::y(),
                ),
            ],
        );
        let positions: JointPositions =
            [("j1".to_string(), 0.0), ("j2".to_string(), 0.0)]
                .into_iter()
                .collect();
        let record = ContactRecord {
            link_a: "link_c".into(),
            body_b: ContactBody::Robot,
            link_b: "link_a".into(),
            position_on_a: Point3::origin(),
            position_on_b: Point3::origin(),
            normal: Vector3::z(),
            distance: 0.02,
        };
        let contact = transform_self(&model, &positions, &record).unwrap();
        assert_eq!(contact.link_a, "link_a");
        assert_eq!(contact.link_b, "link_c");
        // Sides swapped with the sort; the normal flips with them.
        assert_relative_eq!(contact.normal_in_b.z, -1.0);
    }

    #[test]
    fn swapped_self_contact_normal_lands_in_the_new_b_frame() {
        use nalgebra::{Translation3, UnitQuaternion};
        use std::f64::consts::FRAC_PI_2;

        // link_b is mounted rotated 90 degrees about x relative to link_a.
        let model = SerialChainModel::new(
            "arm",
            "base",
            vec![
                JointSpec::revolute("j1", "link_a", Isometry3::identity(), Vector3::y()),
                JointSpec::revolute(
                    "j2",
                    "link_b",
                    Isometry3::from_parts(
                        Translation3::new(0.0, 0.0, 0.3),
                        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2),
                    ),
                    Vector3::y(),
                ),
            ],
        );
        let positions: JointPositions =
            [("j1".to_string(), 0.0), ("j2".to_string(), 0.0)]
                .into_iter()
                .collect();

        // Reverse lexical order: the sides get swapped on reduction. The raw
        // normal is +z in link_a's frame (the record's link_b).
        let record = ContactRecord {
            link_a: "link_b".into(),
            body_b: ContactBody::Robot,
            link_b: "link_a".into(),
            position_on_a: Point3::origin(),
            position_on_b: Point3::origin(),
            normal: Vector3::z(),
            distance: 0.02,
        };
        let contact = transform_self(&model, &positions, &record).unwrap();
        assert_eq!(contact.link_a, "link_a");
        assert_eq!(contact.link_b, "link_b");
        // Flipped to -z in link_a's frame, then re-expressed in link_b's
        // rotated frame: (0, -1, 0).
        assert_relative_eq!(contact.normal_in_b.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(contact.normal_in_b.y, -1.0, epsilon = 1e-12);
        assert_relative_eq!(contact.normal_in_b.z, 0.0, epsilon = 1e-12);
    }
}
