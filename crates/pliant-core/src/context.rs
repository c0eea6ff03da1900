//! The controller context: a typed, injected keyed state store.
//!
//! Builders request symbols for named state (joint positions, evaluated FK
//! frames, collision fields, goal parameters); the control loop binds fresh
//! numeric values each tick and gathers them for the compiled evaluator.
//! Unbound symbols are a hard error at gather time, never a silent zero.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use nalgebra::Isometry3;
use pliant_cas::{Expr, ExprFrame, Symbol, SymbolTable};
use serde_json::Value;

use crate::error::ContextError;

/// A path into the context's keyed state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey(String);

impl StateKey {
    pub fn joint_position(joint: &str) -> Self {
        Self(format!("joints/{joint}/position"))
    }

    pub fn joint_velocity(joint: &str) -> Self {
        Self(format!("joints/{joint}/velocity"))
    }

    pub fn sample_period() -> Self {
        Self("sample_period".into())
    }

    /// One entry of a 3x4 evaluated FK frame (rotation columns 0..3,
    /// translation in column 3).
    pub fn fk_component(root: &str, tip: &str, row: usize, col: usize) -> Self {
        Self(format!("fk/{root}/{tip}/m{row}{col}"))
    }

    pub fn external_collision(link: &str, idx: usize, field: &str) -> Self {
        Self(format!("collisions/external/{link}/{idx}/{field}"))
    }

    pub fn self_collision(link_a: &str, link_b: &str, idx: usize, field: &str) -> Self {
        Self(format!("collisions/self/{link_a}/{link_b}/{idx}/{field}"))
    }

    pub fn param(identity: &str, path: &[&str]) -> Self {
        Self(format!("constraints/{identity}/{}", path.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keyed state shared by the builders and the control loop.
#[derive(Debug, Default)]
pub struct Context {
    table: SymbolTable,
    values: Vec<f64>,
    bound: Vec<bool>,
    params: BTreeMap<String, Value>,
    fk_requests: BTreeSet<(String, String)>,
    external_contact_requests: BTreeSet<(String, usize)>,
    self_contact_requests: BTreeSet<(String, String, usize)>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample_period(sample_period: f64) -> Self {
        let mut ctx = Self::new();
        ctx.bind(&StateKey::sample_period(), sample_period);
        ctx
    }

    /// Intern a symbol for `key`, initially unbound.
    pub fn symbol(&mut self, key: &StateKey) -> Symbol {
        let sym = self.table.intern(key.as_str());
        if sym.index() >= self.values.len() {
            self.values.resize(sym.index() + 1, 0.0);
            self.bound.resize(sym.index() + 1, false);
        }
        sym
    }

    pub fn expr(&mut self, key: &StateKey) -> Expr {
        Expr::symbol(self.symbol(key))
    }

    /// Intern (if needed) and bind a value for `key`.
    pub fn bind(&mut self, key: &StateKey, value: f64) -> Symbol {
        let sym = self.symbol(key);
        self.values[sym.index()] = value;
        self.bound[sym.index()] = true;
        sym
    }

    pub fn value(&self, key: &StateKey) -> Option<f64> {
        let sym = self.table.get(key.as_str())?;
        self.bound[sym.index()].then(|| self.values[sym.index()])
    }

    pub fn symbol_name(&self, sym: Symbol) -> &str {
        self.table.name(sym)
    }

    /// Values for `symbols`, in order. Errors on the first unbound symbol.
    pub fn gather(&self, symbols: &[Symbol]) -> Result<Vec<f64>, ContextError> {
        symbols
            .iter()
            .map(|s| {
                if self.bound[s.index()] {
                    Ok(self.values[s.index()])
                } else {
                    Err(ContextError::UnboundSymbol(self.table.name(*s).to_string()))
                }
            })
            .collect()
    }

    pub fn sample_period_expr(&mut self) -> Expr {
        self.expr(&StateKey::sample_period())
    }

    pub fn set_sample_period(&mut self, value: f64) {
        self.bind(&StateKey::sample_period(), value);
    }

    // -----------------------------------------------------------------------
    // Evaluated FK frames
    // -----------------------------------------------------------------------

    /// Symbolic frame holding last tick's numeric FK for (root, tip).
    ///
    /// The pair is recorded so the control loop knows which frames to
    /// re-evaluate and bind each tick.
    pub fn fk_evaluated_frame(&mut self, root: &str, tip: &str) -> ExprFrame {
        self.fk_requests.insert((root.to_string(), tip.to_string()));
        let mut rot = [Symbol::default(); 9];
        for row in 0..3 {
            for col in 0..3 {
                rot[row * 3 + col] = self.symbol(&StateKey::fk_component(root, tip, row, col));
            }
        }
        let trans = [
            self.symbol(&StateKey::fk_component(root, tip, 0, 3)),
            self.symbol(&StateKey::fk_component(root, tip, 1, 3)),
            self.symbol(&StateKey::fk_component(root, tip, 2, 3)),
        ];
        ExprFrame::from_symbols(&rot, &trans)
    }

    /// The (root, tip) pairs whose evaluated frames must be bound per tick.
    pub fn fk_requests(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fk_requests.iter().map(|(r, t)| (r.as_str(), t.as_str()))
    }

    /// Bind the numeric value of an evaluated FK frame.
    pub fn set_fk_evaluated(&mut self, root: &str, tip: &str, iso: &Isometry3<f64>) {
        let m = iso.rotation.to_rotation_matrix();
        for row in 0..3 {
            for col in 0..3 {
                self.bind(
                    &StateKey::fk_component(root, tip, row, col),
                    m.matrix()[(row, col)],
                );
            }
        }
        let t = iso.translation.vector;
        self.bind(&StateKey::fk_component(root, tip, 0, 3), t.x);
        self.bind(&StateKey::fk_component(root, tip, 1, 3), t.y);
        self.bind(&StateKey::fk_component(root, tip, 2, 3), t.z);
    }

    // -----------------------------------------------------------------------
    // Collision slot requests
    // -----------------------------------------------------------------------

    /// Record that a builder reads the `idx`-th external contact of `link`,
    /// so the collision ledger knows which slots to bind each tick.
    pub fn request_external_contact(&mut self, link: &str, idx: usize) {
        self.external_contact_requests.insert((link.to_string(), idx));
    }

    pub fn external_contact_requests(&self) -> impl Iterator<Item = (&str, usize)> {
        self.external_contact_requests
            .iter()
            .map(|(l, i)| (l.as_str(), *i))
    }

    pub fn request_self_contact(&mut self, link_a: &str, link_b: &str, idx: usize) {
        self.self_contact_requests
            .insert((link_a.to_string(), link_b.to_string(), idx));
    }

    pub fn self_contact_requests(&self) -> impl Iterator<Item = (&str, &str, usize)> {
        self.self_contact_requests
            .iter()
            .map(|(a, b, i)| (a.as_str(), b.as_str(), *i))
    }

    // -----------------------------------------------------------------------
    // Goal parameter store
    // -----------------------------------------------------------------------

    /// Seed a goal's parameter blob under its identity.
    ///
    /// A blob already stored for `identity` is kept untouched, so values
    /// retuned via [`Context::update_params`] survive constraint rebuilds
    /// (which re-run every builder and re-seed unconditionally).
    pub fn set_goal_params(&mut self, identity: &str, params: Value) {
        self.params.entry(identity.to_string()).or_insert(params);
    }

    /// Drop the stored parameter blob of a removed goal, so a later re-add
    /// seeds from its constructor again.
    pub fn clear_goal_params(&mut self, identity: &str) {
        self.params.remove(identity);
    }

    pub fn goal_params(&self, identity: &str) -> Option<&Value> {
        self.params.get(identity)
    }

    /// Symbol bound to the numeric parameter at `identity`/`path`.
    ///
    /// The parameter stays runtime-tunable: later `update_params` calls
    /// rebind the symbol without a structural rebuild.
    pub fn param_expr(&mut self, identity: &str, path: &[&str]) -> Result<Expr, ContextError> {
        let value = lookup_numeric(self.params.get(identity), path).ok_or_else(|| {
            ContextError::UnknownParameter {
                identity: identity.to_string(),
                path: path.join("/"),
            }
        })?;
        let key = StateKey::param(identity, path);
        self.bind(&key, value);
        Ok(self.expr(&key))
    }

    /// Overwrite numeric leaves of the parameter store.
    ///
    /// `updates` is a nested mapping rooted at builder identities. Only
    /// leaves that already exist and are numeric may be overwritten; a
    /// non-mapping value anywhere else is rejected.
    pub fn update_params(&mut self, updates: &Value) -> Result<(), ContextError> {
        let Value::Object(map) = updates else {
            return Err(ContextError::MalformedUpdate {
                path: String::new(),
                message: "update root must be a mapping".into(),
            });
        };
        let mut rebinds = Vec::new();
        for (identity, sub) in map {
            let existing =
                self.params
                    .get_mut(identity)
                    .ok_or_else(|| ContextError::MalformedUpdate {
                        path: identity.clone(),
                        message: "no parameters stored under this identity".into(),
                    })?;
            let mut path = Vec::new();
            merge_numeric_leaves(existing, sub, identity, &mut path, &mut rebinds)?;
        }
        for (key, value) in rebinds {
            self.bind(&key, value);
        }
        Ok(())
    }
}

fn lookup_numeric(root: Option<&Value>, path: &[&str]) -> Option<f64> {
    let mut cur = root?;
    for segment in path {
        cur = cur.get(segment)?;
    }
    cur.as_f64()
}

fn merge_numeric_leaves(
    existing: &mut Value,
    update: &Value,
    identity: &str,
    path: &mut Vec<String>,
    rebinds: &mut Vec<(StateKey, f64)>,
) -> Result<(), ContextError> {
    if let (Some(new), true) = (update.as_f64(), existing.is_number()) {
        *existing = update.clone();
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        rebinds.push((StateKey::param(identity, &segments), new));
        return Ok(());
    }
    let Value::Object(update_map) = update else {
        return Err(ContextError::MalformedUpdate {
            path: format!("{identity}/{}", path.join("/")),
            message: "value is neither a numeric leaf nor a mapping".into(),
        });
    };
    for (member, sub) in update_map {
        path.push(member.clone());
        let sub_existing =
            existing
                .get_mut(member)
                .ok_or_else(|| ContextError::MalformedUpdate {
                    path: format!("{identity}/{}", path.join("/")),
                    message: "no such parameter".into(),
                })?;
        merge_numeric_leaves(sub_existing, sub, identity, path, rebinds)?;
        path.pop();
    }
    Ok(())
}
