//! Symbolic 3-vectors, rotation matrices, homogeneous frames, quaternions.
//!
//! The geometry helpers mirror the conventions used by the numeric side
//! (nalgebra `Isometry3`): column-vector transforms, right-handed frames.

use nalgebra::Isometry3;

use crate::expr::{if_greater_eq, if_greater_zero, if_less_eq, save_division, Expr, Symbol};

/// A symbolic 3-vector (direction: transforms without translation).
#[derive(Debug, Clone)]
pub struct ExprVec3 {
    pub x: Expr,
    pub y: Expr,
    pub z: Expr,
}

impl ExprVec3 {
    pub fn new(x: Expr, y: Expr, z: Expr) -> Self {
        Self { x, y, z }
    }

    pub fn from_f64(x: f64, y: f64, z: f64) -> Self {
        Self::new(Expr::constant(x), Expr::constant(y), Expr::constant(z))
    }

    pub fn zeros() -> Self {
        Self::from_f64(0.0, 0.0, 0.0)
    }

    pub fn add(&self, other: &ExprVec3) -> ExprVec3 {
        ExprVec3::new(
            self.x.clone() + other.x.clone(),
            self.y.clone() + other.y.clone(),
            self.z.clone() + other.z.clone(),
        )
    }

    pub fn sub(&self, other: &ExprVec3) -> ExprVec3 {
        ExprVec3::new(
            self.x.clone() - other.x.clone(),
            self.y.clone() - other.y.clone(),
            self.z.clone() - other.z.clone(),
        )
    }

    pub fn scale(&self, s: &Expr) -> ExprVec3 {
        ExprVec3::new(
            self.x.clone() * s.clone(),
            self.y.clone() * s.clone(),
            self.z.clone() * s.clone(),
        )
    }

    pub fn neg(&self) -> ExprVec3 {
        ExprVec3::new(-self.x.clone(), -self.y.clone(), -self.z.clone())
    }

    pub fn dot(&self, other: &ExprVec3) -> Expr {
        self.x.clone() * other.x.clone()
            + self.y.clone() * other.y.clone()
            + self.z.clone() * other.z.clone()
    }

    pub fn cross(&self, other: &ExprVec3) -> ExprVec3 {
        ExprVec3::new(
            self.y.clone() * other.z.clone() - self.z.clone() * other.y.clone(),
            self.z.clone() * other.x.clone() - self.x.clone() * other.z.clone(),
            self.x.clone() * other.y.clone() - self.y.clone() * other.x.clone(),
        )
    }

    pub fn norm(&self) -> Expr {
        self.dot(self).sqrt()
    }

    /// Unit vector; evaluates to zero when the input is (near) zero length.
    pub fn normalized(&self) -> ExprVec3 {
        let n = self.norm();
        ExprVec3::new(
            save_division(self.x.clone(), n.clone()),
            save_division(self.y.clone(), n.clone()),
            save_division(self.z.clone(), n),
        )
    }

    pub fn components(&self) -> [Expr; 3] {
        [self.x.clone(), self.y.clone(), self.z.clone()]
    }
}

/// A symbolic 3x3 matrix (row-major).
#[derive(Debug, Clone)]
pub struct ExprMat3(pub [[Expr; 3]; 3]);

impl ExprMat3 {
    pub fn identity() -> Self {
        let o = Expr::one;
        let z = Expr::zero;
        Self([
            [o(), z(), z()],
            [z(), o(), z()],
            [z(), z(), o()],
        ])
    }

    pub fn transpose(&self) -> ExprMat3 {
        let m = &self.0;
        ExprMat3([
            [m[0][0].clone(), m[1][0].clone(), m[2][0].clone()],
            [m[0][1].clone(), m[1][1].clone(), m[2][1].clone()],
            [m[0][2].clone(), m[1][2].clone(), m[2][2].clone()],
        ])
    }

    pub fn mul(&self, other: &ExprMat3) -> ExprMat3 {
        let mut out: Vec<Vec<Expr>> = Vec::with_capacity(3);
        for i in 0..3 {
            let mut row = Vec::with_capacity(3);
            for j in 0..3 {
                let mut acc = Expr::zero();
                for (k, other_row) in other.0.iter().enumerate() {
                    acc = acc + self.0[i][k].clone() * other_row[j].clone();
                }
                row.push(acc);
            }
            out.push(row);
        }
        ExprMat3(to_array3(out))
    }

    pub fn mul_vec(&self, v: &ExprVec3) -> ExprVec3 {
        let m = &self.0;
        let comp = |row: &[Expr; 3]| {
            row[0].clone() * v.x.clone()
                + row[1].clone() * v.y.clone()
                + row[2].clone() * v.z.clone()
        };
        ExprVec3::new(comp(&m[0]), comp(&m[1]), comp(&m[2]))
    }

    pub fn trace(&self) -> Expr {
        self.0[0][0].clone() + self.0[1][1].clone() + self.0[2][2].clone()
    }
}

fn to_array3(rows: Vec<Vec<Expr>>) -> [[Expr; 3]; 3] {
    let mut it = rows.into_iter().map(|r| {
        let mut ri = r.into_iter();
        [
            ri.next().unwrap(),
            ri.next().unwrap(),
            ri.next().unwrap(),
        ]
    });
    [it.next().unwrap(), it.next().unwrap(), it.next().unwrap()]
}

/// A symbolic homogeneous transform (rotation + translation).
#[derive(Debug, Clone)]
pub struct ExprFrame {
    pub rot: ExprMat3,
    pub trans: ExprVec3,
}

impl ExprFrame {
    pub fn identity() -> Self {
        Self {
            rot: ExprMat3::identity(),
            trans: ExprVec3::zeros(),
        }
    }

    pub fn new(rot: ExprMat3, trans: ExprVec3) -> Self {
        Self { rot, trans }
    }

    /// Lift a numeric isometry into constant expressions.
    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        let r = iso.rotation.to_rotation_matrix();
        let m = r.matrix();
        let rot = ExprMat3([
            [
                Expr::constant(m[(0, 0)]),
                Expr::constant(m[(0, 1)]),
                Expr::constant(m[(0, 2)]),
            ],
            [
                Expr::constant(m[(1, 0)]),
                Expr::constant(m[(1, 1)]),
                Expr::constant(m[(1, 2)]),
            ],
            [
                Expr::constant(m[(2, 0)]),
                Expr::constant(m[(2, 1)]),
                Expr::constant(m[(2, 2)]),
            ],
        ]);
        let t = iso.translation.vector;
        Self::new(rot, ExprVec3::from_f64(t.x, t.y, t.z))
    }

    /// Frame from 12 symbols laid out row-major: 9 rotation, then translation.
    pub fn from_symbols(rot_syms: &[Symbol; 9], trans_syms: &[Symbol; 3]) -> Self {
        let s = |i: usize| Expr::symbol(rot_syms[i]);
        let rot = ExprMat3([
            [s(0), s(1), s(2)],
            [s(3), s(4), s(5)],
            [s(6), s(7), s(8)],
        ]);
        let trans = ExprVec3::new(
            Expr::symbol(trans_syms[0]),
            Expr::symbol(trans_syms[1]),
            Expr::symbol(trans_syms[2]),
        );
        Self::new(rot, trans)
    }

    pub fn mul(&self, other: &ExprFrame) -> ExprFrame {
        ExprFrame {
            rot: self.rot.mul(&other.rot),
            trans: self.rot.mul_vec(&other.trans).add(&self.trans),
        }
    }

    /// Transform a point (applies translation).
    pub fn transform_point(&self, p: &ExprVec3) -> ExprVec3 {
        self.rot.mul_vec(p).add(&self.trans)
    }

    /// Transform a direction (rotation only).
    pub fn transform_vector(&self, v: &ExprVec3) -> ExprVec3 {
        self.rot.mul_vec(v)
    }

    pub fn position(&self) -> ExprVec3 {
        self.trans.clone()
    }

    pub fn rotation(&self) -> ExprMat3 {
        self.rot.clone()
    }

    /// Rigid-transform inverse: `(R, t)^-1 = (R^T, -R^T t)`.
    pub fn inverse(&self) -> ExprFrame {
        let rt = self.rot.transpose();
        let t = rt.mul_vec(&self.trans).neg();
        ExprFrame::new(rt, t)
    }
}

/// A symbolic quaternion, `(x, y, z, w)` with scalar last.
#[derive(Debug, Clone)]
pub struct ExprQuat {
    pub x: Expr,
    pub y: Expr,
    pub z: Expr,
    pub w: Expr,
}

impl ExprQuat {
    pub fn new(x: Expr, y: Expr, z: Expr, w: Expr) -> Self {
        Self { x, y, z, w }
    }

    pub fn conjugate(&self) -> ExprQuat {
        ExprQuat::new(
            -self.x.clone(),
            -self.y.clone(),
            -self.z.clone(),
            self.w.clone(),
        )
    }

    pub fn dot(&self, other: &ExprQuat) -> Expr {
        self.x.clone() * other.x.clone()
            + self.y.clone() * other.y.clone()
            + self.z.clone() * other.z.clone()
            + self.w.clone() * other.w.clone()
    }

    /// Hamilton product `self * other`.
    pub fn mul(&self, other: &ExprQuat) -> ExprQuat {
        let (x1, y1, z1, w1) = (&self.x, &self.y, &self.z, &self.w);
        let (x2, y2, z2, w2) = (&other.x, &other.y, &other.z, &other.w);
        ExprQuat::new(
            w1.clone() * x2.clone() + x1.clone() * w2.clone() + y1.clone() * z2.clone()
                - z1.clone() * y2.clone(),
            w1.clone() * y2.clone() - x1.clone() * z2.clone()
                + y1.clone() * w2.clone()
                + z1.clone() * x2.clone(),
            w1.clone() * z2.clone() + x1.clone() * y2.clone() - y1.clone() * x2.clone()
                + z1.clone() * w2.clone(),
            w1.clone() * w2.clone()
                - x1.clone() * x2.clone()
                - y1.clone() * y2.clone()
                - z1.clone() * z2.clone(),
        )
    }

    pub fn scale(&self, s: &Expr) -> ExprQuat {
        ExprQuat::new(
            self.x.clone() * s.clone(),
            self.y.clone() * s.clone(),
            self.z.clone() * s.clone(),
            self.w.clone() * s.clone(),
        )
    }

    pub fn add(&self, other: &ExprQuat) -> ExprQuat {
        ExprQuat::new(
            self.x.clone() + other.x.clone(),
            self.y.clone() + other.y.clone(),
            self.z.clone() + other.z.clone(),
            self.w.clone() + other.w.clone(),
        )
    }
}

/// Rodrigues rotation about a symbolic unit axis by a symbolic angle.
pub fn rotation_from_axis_angle(axis: &ExprVec3, angle: &Expr) -> ExprMat3 {
    let c = angle.cos();
    let s = angle.sin();
    let v = Expr::one() - c.clone();
    let (x, y, z) = (&axis.x, &axis.y, &axis.z);
    ExprMat3([
        [
            x.clone() * x.clone() * v.clone() + c.clone(),
            x.clone() * y.clone() * v.clone() - z.clone() * s.clone(),
            x.clone() * z.clone() * v.clone() + y.clone() * s.clone(),
        ],
        [
            y.clone() * x.clone() * v.clone() + z.clone() * s.clone(),
            y.clone() * y.clone() * v.clone() + c.clone(),
            y.clone() * z.clone() * v.clone() - x.clone() * s.clone(),
        ],
        [
            z.clone() * x.clone() * v.clone() - y.clone() * s.clone(),
            z.clone() * y.clone() * v.clone() + x.clone() * s.clone(),
            z.clone() * z.clone() * v + c,
        ],
    ])
}

/// Rotation matrix from a (unit) quaternion.
pub fn rotation_from_quaternion(q: &ExprQuat) -> ExprMat3 {
    let (x, y, z, w) = (&q.x, &q.y, &q.z, &q.w);
    let two = || Expr::constant(2.0);
    ExprMat3([
        [
            Expr::one() - two()* (y.clone() * y.clone() + z.clone() * z.clone()),
            two() * (x.clone() * y.clone() - z.clone() * w.clone()),
            two() * (x.clone() * z.clone() + y.clone() * w.clone()),
        ],
        [
            two() * (x.clone() * y.clone() + z.clone() * w.clone()),
            Expr::one() - two() * (x.clone() * x.clone() + z.clone() * z.clone()),
            two() * (y.clone() * z.clone() - x.clone() * w.clone()),
        ],
        [
            two() * (x.clone() * z.clone() - y.clone() * w.clone()),
            two() * (y.clone() * z.clone() + x.clone() * w.clone()),
            Expr::one() - two() * (x.clone() * x.clone() + y.clone() * y.clone()),
        ],
    ])
}

/// Axis-angle extraction from a rotation matrix.
///
/// Undefined at exactly zero rotation; callers perturb the input (the
/// 1e-4 rad "hack" rotation) before extraction where that matters.
pub fn axis_angle_from_matrix(m: &ExprMat3) -> (ExprVec3, Expr) {
    let cos_angle = (m.trace() - Expr::one()) * Expr::constant(0.5);
    let cos_angle = cos_angle.min(&Expr::one()).max(&Expr::constant(-1.0));
    let angle = cos_angle.acos();
    let two_sin = angle.sin() * Expr::constant(2.0);
    let axis = ExprVec3::new(
        save_division(m.0[2][1].clone() - m.0[1][2].clone(), two_sin.clone()),
        save_division(m.0[0][2].clone() - m.0[2][0].clone(), two_sin.clone()),
        save_division(m.0[1][0].clone() - m.0[0][1].clone(), two_sin),
    );
    (axis, angle)
}

/// Axis-angle from a quaternion `(x, y, z, w)`.
pub fn axis_angle_from_quaternion(q: &ExprQuat) -> (ExprVec3, Expr) {
    let w = q.w.clone().min(&Expr::one()).max(&Expr::constant(-1.0));
    let angle = w.acos() * Expr::constant(2.0);
    let s = (Expr::one() - w.clone() * w).sqrt();
    let axis = ExprVec3::new(
        save_division(q.x.clone(), s.clone()),
        save_division(q.y.clone(), s.clone()),
        save_division(q.z.clone(), s),
    );
    (axis, angle)
}

/// Quaternion from a rotation matrix.
///
/// Uses the w-major form; valid away from angle = pi, which the controller's
/// per-tick re-linearization never reaches in one step.
pub fn quaternion_from_matrix(m: &ExprMat3) -> ExprQuat {
    let w = ((m.trace() + Expr::one()).max(&Expr::constant(1e-12))).sqrt()
        * Expr::constant(0.5);
    let four_w = w.clone() * Expr::constant(4.0);
    ExprQuat::new(
        save_division(m.0[2][1].clone() - m.0[1][2].clone(), four_w.clone()),
        save_division(m.0[0][2].clone() - m.0[2][0].clone(), four_w.clone()),
        save_division(m.0[1][0].clone() - m.0[0][1].clone(), four_w),
        w,
    )
}

/// Spherical linear interpolation between two unit quaternions.
pub fn quaternion_slerp(q1: &ExprQuat, q2: &ExprQuat, t: &Expr) -> ExprQuat {
    let cos_half = q1.dot(q2);
    // Take the short way around.
    let flip = |c: &Expr| if_greater_zero(cos_half.clone(), c.clone(), -c.clone());
    let q2 = ExprQuat::new(flip(&q2.x), flip(&q2.y), flip(&q2.z), flip(&q2.w));
    let cos_half = cos_half.abs();

    let half_theta = cos_half.clone().min(&Expr::one()).acos();
    let sin_half = (Expr::one() - cos_half.clone() * cos_half.clone())
        .max(&Expr::zero())
        .sqrt();

    let ratio_a = if_less_eq(
        sin_half.clone(),
        Expr::constant(1e-8),
        Expr::constant(0.5),
        ((Expr::one() - t.clone()) * half_theta.clone()).sin() / sin_half.clone(),
    );
    let ratio_b = if_less_eq(
        sin_half.clone(),
        Expr::constant(1e-8),
        Expr::constant(0.5),
        (t.clone() * half_theta).sin() / sin_half,
    );
    let blended = q1.scale(&ratio_a).add(&q2.scale(&ratio_b));
    // Degenerate to q1 when the quaternions already coincide.
    let pick = |a: &Expr, b: &Expr| {
        if_greater_eq(
            cos_half.clone(),
            Expr::constant(1.0 - 1e-12),
            a.clone(),
            b.clone(),
        )
    };
    ExprQuat::new(
        pick(&q1.x, &blended.x),
        pick(&q1.y, &blended.y),
        pick(&q1.z, &blended.z),
        pick(&q1.w, &blended.w),
    )
}

/// Relative rotation `q1^-1 * q2` as a quaternion.
pub fn quaternion_diff(q1: &ExprQuat, q2: &ExprQuat) -> ExprQuat {
    q1.conjugate().mul(q2)
}

/// Spherical interpolation between two unit vectors by fraction `t`.
pub fn vector_slerp(a: &ExprVec3, b: &ExprVec3, t: &Expr) -> ExprVec3 {
    let cos_angle = a.dot(b).min(&Expr::one()).max(&Expr::constant(-1.0));
    let angle = cos_angle.acos();
    let sin_angle = angle.sin();
    let wa = save_division(((Expr::one() - t.clone()) * angle.clone()).sin(), sin_angle.clone());
    let wb = save_division((t.clone() * angle.clone()).sin(), sin_angle.clone());
    let blended = a.scale(&wa).add(&b.scale(&wb));
    // Near-parallel vectors: fall back to linear interpolation.
    let lerp = a
        .scale(&(Expr::one() - t.clone()))
        .add(&b.scale(t));
    let pick = |s: &Expr, l: &Expr| {
        if_less_eq(
            sin_angle.clone(),
            Expr::constant(1e-8),
            l.clone(),
            s.clone(),
        )
    };
    ExprVec3::new(
        pick(&blended.x, &lerp.x),
        pick(&blended.y, &lerp.y),
        pick(&blended.z, &lerp.z),
    )
}

/// Distance from a point to a segment, plus the nearest point on it.
pub fn distance_point_to_line_segment(
    point: &ExprVec3,
    line_start: &ExprVec3,
    line_end: &ExprVec3,
) -> (Expr, ExprVec3) {
    let d = line_end.sub(line_start);
    let len_sq = d.dot(&d);
    let t = save_division(point.sub(line_start).dot(&d), len_sq)
        .min(&Expr::one())
        .max(&Expr::zero());
    let nearest = line_start.add(&d.scale(&t));
    (point.sub(&nearest).norm(), nearest)
}
