//! Tape compilation of expression matrices.
//!
//! The controller evaluates the same symbolic matrices every tick with fresh
//! inputs. Walking the `Expr` graph each time would redo shared work, so a
//! matrix is lowered once into a flat instruction tape with common
//! subexpressions deduplicated, then evaluated by a single pass over the tape.

use std::collections::HashMap;

use nalgebra::DMatrix;

use crate::expr::{Expr, Node, Symbol};

#[derive(Debug, Clone)]
enum Instr {
    Const(f64),
    /// Load from the input slice at the given position.
    Load(usize),
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Div(usize, usize),
    Neg(usize),
    Pow(usize, f64),
    Sqrt(usize),
    Abs(usize),
    Sign(usize),
    Floor(usize),
    Sin(usize),
    Cos(usize),
    Acos(usize),
    Min(usize, usize),
    Max(usize, usize),
    IfLessEq(usize, usize, usize, usize),
}

/// A symbolic matrix lowered to an instruction tape.
///
/// Inputs are the union of the free symbols of all entries, in ascending
/// symbol order; [`CompiledMatrix::inputs`] reports the exact order callers
/// must supply values in.
#[derive(Debug, Clone)]
pub struct CompiledMatrix {
    instrs: Vec<Instr>,
    outputs: Vec<usize>,
    rows: usize,
    cols: usize,
    inputs: Vec<Symbol>,
}

struct Lowering<'a> {
    instrs: Vec<Instr>,
    /// Graph node (by allocation identity) to tape slot.
    seen: HashMap<*const Node, usize>,
    /// Constants and symbol loads deduplicated by value.
    const_slots: HashMap<u64, usize>,
    sym_slots: HashMap<Symbol, usize>,
    input_pos: &'a HashMap<Symbol, usize>,
}

impl<'a> Lowering<'a> {
    fn push(&mut self, instr: Instr) -> usize {
        self.instrs.push(instr);
        self.instrs.len() - 1
    }

    fn lower(&mut self, expr: &Expr) -> usize {
        let ptr = expr.node_ptr();
        if let Some(&slot) = self.seen.get(&ptr) {
            return slot;
        }
        let slot = match expr.node() {
            Node::Const(c) => {
                let bits = c.to_bits();
                if let Some(&slot) = self.const_slots.get(&bits) {
                    slot
                } else {
                    let slot = self.push(Instr::Const(*c));
                    self.const_slots.insert(bits, slot);
                    slot
                }
            }
            Node::Sym(s) => {
                if let Some(&slot) = self.sym_slots.get(s) {
                    slot
                } else {
                    let slot = self.push(Instr::Load(self.input_pos[s]));
                    self.sym_slots.insert(*s, slot);
                    slot
                }
            }
            Node::Add(a, b) => {
                let (a, b) = (self.lower(a), self.lower(b));
                self.push(Instr::Add(a, b))
            }
            Node::Sub(a, b) => {
                let (a, b) = (self.lower(a), self.lower(b));
                self.push(Instr::Sub(a, b))
            }
            Node::Mul(a, b) => {
                let (a, b) = (self.lower(a), self.lower(b));
                self.push(Instr::Mul(a, b))
            }
            Node::Div(a, b) => {
                let (a, b) = (self.lower(a), self.lower(b));
                self.push(Instr::Div(a, b))
            }
            Node::Neg(a) => {
                let a = self.lower(a);
                self.push(Instr::Neg(a))
            }
            Node::Pow(a, e) => {
                let a = self.lower(a);
                self.push(Instr::Pow(a, *e))
            }
            Node::Sqrt(a) => {
                let a = self.lower(a);
                self.push(Instr::Sqrt(a))
            }
            Node::Abs(a) => {
                let a = self.lower(a);
                self.push(Instr::Abs(a))
            }
            Node::Sign(a) => {
                let a = self.lower(a);
                self.push(Instr::Sign(a))
            }
            Node::Floor(a) => {
                let a = self.lower(a);
                self.push(Instr::Floor(a))
            }
            Node::Sin(a) => {
                let a = self.lower(a);
                self.push(Instr::Sin(a))
            }
            Node::Cos(a) => {
                let a = self.lower(a);
                self.push(Instr::Cos(a))
            }
            Node::Acos(a) => {
                let a = self.lower(a);
                self.push(Instr::Acos(a))
            }
            Node::Min(a, b) => {
                let (a, b) = (self.lower(a), self.lower(b));
                self.push(Instr::Min(a, b))
            }
            Node::Max(a, b) => {
                let (a, b) = (self.lower(a), self.lower(b));
                self.push(Instr::Max(a, b))
            }
            Node::IfLessEq(a, b, t, e) => {
                let a = self.lower(a);
                let b = self.lower(b);
                let t = self.lower(t);
                let e = self.lower(e);
                self.push(Instr::IfLessEq(a, b, t, e))
            }
        };
        self.seen.insert(ptr, slot);
        slot
    }
}

impl CompiledMatrix {
    /// Lower a row-major grid of expressions. Rows must be equal length.
    pub fn compile(entries: &[Vec<Expr>]) -> Self {
        let rows = entries.len();
        let cols = entries.first().map_or(0, Vec::len);
        debug_assert!(entries.iter().all(|r| r.len() == cols));

        let mut symbols = std::collections::BTreeSet::new();
        for row in entries {
            for e in row {
                symbols.extend(e.free_symbols());
            }
        }
        let inputs: Vec<Symbol> = symbols.into_iter().collect();
        let input_pos: HashMap<Symbol, usize> =
            inputs.iter().enumerate().map(|(i, s)| (*s, i)).collect();

        let mut lowering = Lowering {
            instrs: Vec::new(),
            seen: HashMap::new(),
            const_slots: HashMap::new(),
            sym_slots: HashMap::new(),
            input_pos: &input_pos,
        };
        let mut outputs = Vec::with_capacity(rows * cols);
        for row in entries {
            for e in row {
                outputs.push(lowering.lower(e));
            }
        }
        Self {
            instrs: lowering.instrs,
            outputs,
            rows,
            cols,
            inputs,
        }
    }

    /// Lower a column of expressions (an n x 1 matrix).
    pub fn compile_vector(entries: &[Expr]) -> Self {
        let grid: Vec<Vec<Expr>> = entries.iter().map(|e| vec![e.clone()]).collect();
        Self::compile(&grid)
    }

    /// The symbols this tape reads, in the order `eval` expects them.
    pub fn inputs(&self) -> &[Symbol] {
        &self.inputs
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn instruction_count(&self) -> usize {
        self.instrs.len()
    }

    /// Evaluate the tape. `values[i]` binds `self.inputs()[i]`.
    ///
    /// # Panics
    /// If `values.len() != self.inputs().len()`.
    pub fn eval(&self, values: &[f64]) -> DMatrix<f64> {
        assert_eq!(
            values.len(),
            self.inputs.len(),
            "tape expects {} inputs, got {}",
            self.inputs.len(),
            values.len()
        );
        let mut slots = vec![0.0f64; self.instrs.len()];
        for (i, instr) in self.instrs.iter().enumerate() {
            slots[i] = match *instr {
                Instr::Const(c) => c,
                Instr::Load(p) => values[p],
                Instr::Add(a, b) => slots[a] + slots[b],
                Instr::Sub(a, b) => slots[a] - slots[b],
                Instr::Mul(a, b) => slots[a] * slots[b],
                Instr::Div(a, b) => slots[a] / slots[b],
                Instr::Neg(a) => -slots[a],
                Instr::Pow(a, e) => slots[a].powf(e),
                Instr::Sqrt(a) => slots[a].sqrt(),
                Instr::Abs(a) => slots[a].abs(),
                Instr::Sign(a) => {
                    if slots[a] == 0.0 {
                        0.0
                    } else {
                        slots[a].signum()
                    }
                }
                Instr::Floor(a) => slots[a].floor(),
                Instr::Sin(a) => slots[a].sin(),
                Instr::Cos(a) => slots[a].cos(),
                Instr::Acos(a) => slots[a].clamp(-1.0, 1.0).acos(),
                Instr::Min(a, b) => slots[a].min(slots[b]),
                Instr::Max(a, b) => slots[a].max(slots[b]),
                Instr::IfLessEq(a, b, t, e) => {
                    if slots[a] <= slots[b] {
                        slots[t]
                    } else {
                        slots[e]
                    }
                }
            };
        }
        DMatrix::from_fn(self.rows, self.cols, |i, j| {
            slots[self.outputs[i * self.cols + j]]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::SymbolTable;
    use approx::assert_relative_eq;

    #[test]
    fn tape_matches_tree_eval() {
        let mut table = SymbolTable::new();
        let x = table.intern("x");
        let y = table.intern("y");
        let (ex, ey) = (Expr::symbol(x), Expr::symbol(y));

        let e = (ex.clone() * ey.clone() + ex.clone().sin()).sqrt()
            / (ey.clone() + Expr::constant(2.0));
        let m = CompiledMatrix::compile_vector(&[e.clone()]);
        assert_eq!(m.inputs(), &[x, y]);

        let vals = [1.3, 0.7];
        let out = m.eval(&vals);
        assert_relative_eq!(out[(0, 0)], e.eval(&vals), epsilon = 1e-14);
    }

    #[test]
    fn shared_subexpressions_lower_once() {
        let mut table = SymbolTable::new();
        let x = table.intern("x");
        let shared = Expr::symbol(x).sin();
        // shared appears in both entries via the same Arc.
        let a = shared.clone() * Expr::constant(2.0);
        let b = shared.clone() + Expr::one();
        let m = CompiledMatrix::compile(&[vec![a, b]]);

        let sin_count = m
            .instrs
            .iter()
            .filter(|i| matches!(i, Instr::Sin(_)))
            .count();
        assert_eq!(sin_count, 1);
    }

    #[test]
    fn duplicate_constants_dedup() {
        let e1 = Expr::constant(3.5) + Expr::constant(1.0);
        let e2 = Expr::constant(3.5) * Expr::constant(2.0);
        let m = CompiledMatrix::compile(&[vec![e1, e2]]);
        let const_35 = m
            .instrs
            .iter()
            .filter(|i| matches!(i, Instr::Const(c) if *c == 3.5))
            .count();
        assert_eq!(const_35, 1);
    }

    #[test]
    fn matrix_shape_and_ordering() {
        let mut table = SymbolTable::new();
        let a = table.intern("a");
        let b = table.intern("b");
        let rows = vec![
            vec![Expr::symbol(a), Expr::symbol(b)],
            vec![Expr::symbol(b), Expr::symbol(a) * Expr::constant(-1.0)],
        ];
        let m = CompiledMatrix::compile(&rows);
        assert_eq!((m.rows(), m.cols()), (2, 2));
        let out = m.eval(&[2.0, 5.0]);
        assert_relative_eq!(out[(0, 0)], 2.0);
        assert_relative_eq!(out[(0, 1)], 5.0);
        assert_relative_eq!(out[(1, 0)], 5.0);
        assert_relative_eq!(out[(1, 1)], -2.0);
    }

    #[test]
    fn branch_selection_discards_dead_nan() {
        let mut table = SymbolTable::new();
        let x = table.intern("x");
        let ex = Expr::symbol(x);
        // 1/x is NaN-free only when the guard picks the other branch.
        let e = crate::expr::if_less_eq(
            ex.clone().abs(),
            Expr::constant(1e-12),
            Expr::zero(),
            Expr::one() / ex,
        );
        let m = CompiledMatrix::compile_vector(&[e]);
        let out = m.eval(&[0.0]);
        assert_relative_eq!(out[(0, 0)], 0.0);
    }
}
