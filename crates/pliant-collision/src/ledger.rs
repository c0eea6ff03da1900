//! The per-tick collision ledger.
//!
//! [`Collisions`] keeps the closest contacts of the current tick, grouped by
//! controlled link (external) or sorted controlled link pair (self). Each
//! group stays sorted ascending by distance and never grows past the
//! configured capacity. Queries past the stored count return a sentinel
//! far-away contact so constraint rows always have something to bind.

use std::collections::BTreeMap;

use nalgebra::{Point3, Vector3};
use pliant_cas::{Expr, ExprVec3};
use pliant_core::{Context, StateKey};
use pliant_robot::{JointPositions, KinematicModel};

use crate::contact::{
    transform_external, transform_self, ContactBody, ContactRecord, ExternalContact, SelfContact,
};
use pliant_core::ModelError;

pub const FIELD_POSITION_ON_A: [&str; 3] = ["position_on_a/x", "position_on_a/y", "position_on_a/z"];
pub const FIELD_POSITION_ON_B: [&str; 3] = ["position_on_b/x", "position_on_b/y", "position_on_b/z"];
pub const FIELD_NORMAL: [&str; 3] = ["normal/x", "normal/y", "normal/z"];
pub const FIELD_DISTANCE: &str = "distance";

/// Symbolic handles onto one external contact slot.
///
/// Created once at constraint-build time; the ledger rebinds the underlying
/// symbols every tick.
pub struct ExternalContactInputs {
    /// Contact point on the robot, in the controlled link's frame.
    pub position_on_a: ExprVec3,
    /// Contact point on the obstacle, in the robot root frame.
    pub position_on_b: ExprVec3,
    /// Contact normal in the robot root frame.
    pub normal: ExprVec3,
    pub distance: Expr,
}

impl ExternalContactInputs {
    pub fn request(ctx: &mut Context, link: &str, idx: usize) -> Self {
        ctx.request_external_contact(link, idx);
        let mut field = |f: &str| ctx.expr(&StateKey::external_collision(link, idx, f));
        Self {
            position_on_a: vec3_exprs(&mut field, &FIELD_POSITION_ON_A),
            position_on_b: vec3_exprs(&mut field, &FIELD_POSITION_ON_B),
            normal: vec3_exprs(&mut field, &FIELD_NORMAL),
            distance: field(FIELD_DISTANCE),
        }
    }
}

/// Symbolic handles onto one self contact slot.
pub struct SelfContactInputs {
    /// Contact point on link a, in link a's frame.
    pub position_on_a: ExprVec3,
    /// Contact point on link b, in link b's frame.
    pub position_on_b: ExprVec3,
    /// Contact normal in link b's frame.
    pub normal: ExprVec3,
    pub distance: Expr,
}

impl SelfContactInputs {
    pub fn request(ctx: &mut Context, link_a: &str, link_b: &str, idx: usize) -> Self {
        ctx.request_self_contact(link_a, link_b, idx);
        let mut field = |f: &str| ctx.expr(&StateKey::self_collision(link_a, link_b, idx, f));
        Self {
            position_on_a: vec3_exprs(&mut field, &FIELD_POSITION_ON_A),
            position_on_b: vec3_exprs(&mut field, &FIELD_POSITION_ON_B),
            normal: vec3_exprs(&mut field, &FIELD_NORMAL),
            distance: field(FIELD_DISTANCE),
        }
    }
}

fn vec3_exprs(field: &mut impl FnMut(&str) -> Expr, names: &[&str; 3]) -> ExprVec3 {
    ExprVec3::new(field(names[0]), field(names[1]), field(names[2]))
}

/// The closest contacts of the current tick.
#[derive(Debug)]
pub struct Collisions {
    capacity: usize,
    external: BTreeMap<String, Vec<ExternalContact>>,
    self_contacts: BTreeMap<(String, String), Vec<SelfContact>>,
}

impl Collisions {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            external: BTreeMap::new(),
            self_contacts: BTreeMap::new(),
        }
    }

    /// Drop all contacts, keeping the capacity.
    pub fn clear(&mut self) {
        self.external.clear();
        self.self_contacts.clear();
    }

    pub fn add_external(&mut self, contact: ExternalContact) {
        let entries = self.external.entry(contact.link.clone()).or_default();
        let pos = entries
            .binary_search_by(|c| c.distance.total_cmp(&contact.distance))
            .unwrap_or_else(|p| p);
        entries.insert(pos, contact);
        entries.truncate(self.capacity);
    }

    pub fn add_self(&mut self, contact: SelfContact) {
        let key = (contact.link_a.clone(), contact.link_b.clone());
        let entries = self.self_contacts.entry(key).or_default();
        let pos = entries
            .binary_search_by(|c| c.distance.total_cmp(&contact.distance))
            .unwrap_or_else(|p| p);
        entries.insert(pos, contact);
        entries.truncate(self.capacity);
    }

    /// Transform and file a batch of raw contacts.
    pub fn ingest(
        &mut self,
        model: &dyn KinematicModel,
        positions: &JointPositions,
        records: &[ContactRecord],
    ) -> Result<(), ModelError> {
        for record in records {
            match record.body_b {
                ContactBody::Robot => {
                    self.add_self(transform_self(model, positions, record)?);
                }
                ContactBody::External(_) => {
                    self.add_external(transform_external(model, positions, record)?);
                }
            }
        }
        Ok(())
    }

    /// The `idx`-th closest external contact of `link`, or the sentinel.
    pub fn external(&self, link: &str, idx: usize) -> ExternalContact {
        self.external
            .get(link)
            .and_then(|v| v.get(idx))
            .cloned()
            .unwrap_or_else(ExternalContact::no_contact)
    }

    /// The `idx`-th closest self contact of the sorted pair, or the sentinel.
    pub fn self_contact(&self, link_a: &str, link_b: &str, idx: usize) -> SelfContact {
        self.self_contacts
            .get(&(link_a.to_string(), link_b.to_string()))
            .and_then(|v| v.get(idx))
            .cloned()
            .unwrap_or_else(SelfContact::no_contact)
    }

    pub fn external_count(&self, link: &str) -> usize {
        self.external.get(link).map_or(0, Vec::len)
    }

    pub fn self_count(&self, link_a: &str, link_b: &str) -> usize {
        self.self_contacts
            .get(&(link_a.to_string(), link_b.to_string()))
            .map_or(0, Vec::len)
    }

    /// Bind every contact slot a builder requested on `ctx`.
    ///
    /// Slots without a stored contact get the sentinel, so the evaluator
    /// never sees an unbound collision symbol.
    pub fn bind(&self, ctx: &mut Context) {
        let external: Vec<(String, usize)> = ctx
            .external_contact_requests()
            .map(|(l, i)| (l.to_string(), i))
            .collect();
        for (link, idx) in external {
            let contact = self.external(&link, idx);
            bind_external_slot(ctx, &link, idx, &contact);
        }

        let selfs: Vec<(String, String, usize)> = ctx
            .self_contact_requests()
            .map(|(a, b, i)| (a.to_string(), b.to_string(), i))
            .collect();
        for (a, b, idx) in selfs {
            let contact = self.self_contact(&a, &b, idx);
            bind_self_slot(ctx, &a, &b, idx, &contact);
        }
    }
}

fn bind_external_slot(ctx: &mut Context, link: &str, idx: usize, contact: &ExternalContact) {
    bind_point(ctx, contact.position_on_a_in_a, |f| {
        StateKey::external_collision(link, idx, f)
    }, &FIELD_POSITION_ON_A);
    bind_point(ctx, contact.position_on_b_in_root, |f| {
        StateKey::external_collision(link, idx, f)
    }, &FIELD_POSITION_ON_B);
    bind_vector(ctx, contact.normal_in_root, |f| {
        StateKey::external_collision(link, idx, f)
    }, &FIELD_NORMAL);
    ctx.bind(
        &StateKey::external_collision(link, idx, FIELD_DISTANCE),
        contact.distance,
    );
}

fn bind_self_slot(
    ctx: &mut Context,
    link_a: &str,
    link_b: &str,
    idx: usize,
    contact: &SelfContact,
) {
    bind_point(ctx, contact.position_on_a_in_a, |f| {
        StateKey::self_collision(link_a, link_b, idx, f)
    }, &FIELD_POSITION_ON_A);
    bind_point(ctx, contact.position_on_b_in_b, |f| {
        StateKey::self_collision(link_a, link_b, idx, f)
    }, &FIELD_POSITION_ON_B);
    bind_vector(ctx, contact.normal_in_b, |f| {
        StateKey::self_collision(link_a, link_b, idx, f)
    }, &FIELD_NORMAL);
    ctx.bind(
        &StateKey::self_collision(link_a, link_b, idx, FIELD_DISTANCE),
        contact.distance,
    );
}

fn bind_point(
    ctx: &mut Context,
    p: Point3<f64>,
    key: impl Fn(&str) -> StateKey,
    fields: &[&str; 3],
) {
    ctx.bind(&key(fields[0]), p.x);
    ctx.bind(&key(fields[1]), p.y);
    ctx.bind(&key(fields[2]), p.z);
}

fn bind_vector(
    ctx: &mut Context,
    v: Vector3<f64>,
    key: impl Fn(&str) -> StateKey,
    fields: &[&str; 3],
) {
    ctx.bind(&key(fields[0]), v.x);
    ctx.bind(&key(fields[1]), v.y);
    ctx.bind(&key(fields[2]), v.z);
}
