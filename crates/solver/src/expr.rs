//! Symbolic expression trees over sketch parameters.
//!
//! Nodes hold reference-counted children, so a derivative tree can share the
//! operands of the tree it was derived from: dropping either tree releases
//! only what it uniquely owns, and a constraint's equation stays intact
//! across relinks.
//!
//! Two leaf flavors exist. Direct leaves name a parameter by handle.
//! Slot-indexed leaves (`SlotParam`, `SlotPointX`, `SlotPointY`,
//! `SlotRadius`) index into the owning constraint's slot arrays, which lets
//! one equation template serve many constraint instances; they resolve only
//! under constraint-scoped evaluation and read as 0 everywhere else.

use std::rc::Rc;

use freehand_arena::SlotTable;

use crate::constraint::Entity;
use crate::sketch::Parameter;
use crate::{EntityHandle, ParamHandle};

/// A node in a symbolic expression tree.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Numeric literal.
    Const(f64),
    /// Value of the parameter named by handle.
    Param(ParamHandle),
    /// Value of the parameter in slot `i` of the enclosing constraint.
    SlotParam(u16),
    /// X coordinate of the point entity in slot `i` of the enclosing constraint.
    SlotPointX(u16),
    /// Y coordinate of the point entity in slot `i` of the enclosing constraint.
    SlotPointY(u16),
    /// Radius of the circle entity in slot `i` of the enclosing constraint.
    SlotRadius(u16),
    Add(Rc<Expr>, Rc<Expr>),
    Sub(Rc<Expr>, Rc<Expr>),
    Mul(Rc<Expr>, Rc<Expr>),
    Div(Rc<Expr>, Rc<Expr>),
    Sin(Rc<Expr>),
    Cos(Rc<Expr>),
    Asin(Rc<Expr>),
    Acos(Rc<Expr>),
    Sqrt(Rc<Expr>),
    Sqr(Rc<Expr>),
}

// ── Factories ───────────────────────────────────────────────────────────────

impl Expr {
    pub fn constant(value: f64) -> Rc<Self> {
        Rc::new(Expr::Const(value))
    }

    pub fn param(handle: ParamHandle) -> Rc<Self> {
        Rc::new(Expr::Param(handle))
    }

    pub fn slot_param(slot: u16) -> Rc<Self> {
        Rc::new(Expr::SlotParam(slot))
    }

    pub fn point_x(slot: u16) -> Rc<Self> {
        Rc::new(Expr::SlotPointX(slot))
    }

    pub fn point_y(slot: u16) -> Rc<Self> {
        Rc::new(Expr::SlotPointY(slot))
    }

    pub fn radius(slot: u16) -> Rc<Self> {
        Rc::new(Expr::SlotRadius(slot))
    }

    pub fn add(a: Rc<Self>, b: Rc<Self>) -> Rc<Self> {
        Rc::new(Expr::Add(a, b))
    }

    pub fn sub(a: Rc<Self>, b: Rc<Self>) -> Rc<Self> {
        Rc::new(Expr::Sub(a, b))
    }

    pub fn mul(a: Rc<Self>, b: Rc<Self>) -> Rc<Self> {
        Rc::new(Expr::Mul(a, b))
    }

    pub fn div(a: Rc<Self>, b: Rc<Self>) -> Rc<Self> {
        Rc::new(Expr::Div(a, b))
    }

    pub fn sin(a: Rc<Self>) -> Rc<Self> {
        Rc::new(Expr::Sin(a))
    }

    pub fn cos(a: Rc<Self>) -> Rc<Self> {
        Rc::new(Expr::Cos(a))
    }

    pub fn asin(a: Rc<Self>) -> Rc<Self> {
        Rc::new(Expr::Asin(a))
    }

    pub fn acos(a: Rc<Self>) -> Rc<Self> {
        Rc::new(Expr::Acos(a))
    }

    pub fn sqrt(a: Rc<Self>) -> Rc<Self> {
        Rc::new(Expr::Sqrt(a))
    }

    pub fn sqr(a: Rc<Self>) -> Rc<Self> {
        Rc::new(Expr::Sqr(a))
    }
}

// ── Evaluation ──────────────────────────────────────────────────────────────

/// Lookup context for evaluation and slot resolution.
///
/// `ents`/`pars` are the slot arrays of the constraint being evaluated;
/// empty slices give free evaluation, where every slot-indexed leaf reads 0.
pub(crate) struct EvalScope<'a> {
    pub params: &'a SlotTable<ParamHandle, Parameter>,
    pub entities: &'a SlotTable<EntityHandle, Entity>,
    pub ents: &'a [EntityHandle],
    pub pars: &'a [ParamHandle],
}

impl<'a> EvalScope<'a> {
    pub(crate) fn new(
        params: &'a SlotTable<ParamHandle, Parameter>,
        entities: &'a SlotTable<EntityHandle, Entity>,
        ents: &'a [EntityHandle],
        pars: &'a [ParamHandle],
    ) -> Self {
        Self {
            params,
            entities,
            ents,
            pars,
        }
    }

    fn param_value(&self, handle: ParamHandle) -> f64 {
        self.params.get(handle).map_or(0.0, |p| p.value)
    }

    fn slot_entity(&self, slot: u16) -> Option<&Entity> {
        let handle = *self.ents.get(slot as usize)?;
        self.entities.get(handle)
    }
}

impl Expr {
    /// Evaluate against `scope`. Resolution failures (stale handle, slot out
    /// of range, entity of the wrong shape) read as 0 rather than raising,
    /// so one broken reference cannot abort a solve.
    pub(crate) fn eval(&self, scope: &EvalScope<'_>) -> f64 {
        match self {
            Expr::Const(value) => *value,
            Expr::Param(handle) => scope.param_value(*handle),
            Expr::SlotParam(slot) => scope
                .pars
                .get(*slot as usize)
                .map_or(0.0, |&h| scope.param_value(h)),
            Expr::SlotPointX(slot) => match scope.slot_entity(*slot) {
                Some(Entity::Point { x, .. }) => scope.param_value(*x),
                _ => 0.0,
            },
            Expr::SlotPointY(slot) => match scope.slot_entity(*slot) {
                Some(Entity::Point { y, .. }) => scope.param_value(*y),
                _ => 0.0,
            },
            Expr::SlotRadius(slot) => match scope.slot_entity(*slot) {
                Some(Entity::Circle { radius, .. }) => scope.param_value(*radius),
                _ => 0.0,
            },
            Expr::Add(a, b) => a.eval(scope) + b.eval(scope),
            Expr::Sub(a, b) => a.eval(scope) - b.eval(scope),
            Expr::Mul(a, b) => a.eval(scope) * b.eval(scope),
            Expr::Div(a, b) => a.eval(scope) / b.eval(scope),
            Expr::Sin(a) => a.eval(scope).sin(),
            Expr::Cos(a) => a.eval(scope).cos(),
            Expr::Asin(a) => a.eval(scope).asin(),
            Expr::Acos(a) => a.eval(scope).acos(),
            Expr::Sqrt(a) => a.eval(scope).sqrt(),
            Expr::Sqr(a) => {
                let value = a.eval(scope);
                value * value
            }
        }
    }

    /// Symbolic derivative with respect to `wrt`.
    ///
    /// Operands reused verbatim are shared with `self` via `Rc`. Slot-indexed
    /// leaves differentiate to 0: their target is unknowable here, so the
    /// linker resolves them to direct leaves (see [`resolve_slots`]) before
    /// differentiating.
    pub fn derivative(&self, wrt: ParamHandle) -> Rc<Expr> {
        match self {
            Expr::Const(_) => Expr::constant(0.0),
            Expr::Param(handle) => {
                Expr::constant(if *handle == wrt { 1.0 } else { 0.0 })
            }
            Expr::SlotParam(_)
            | Expr::SlotPointX(_)
            | Expr::SlotPointY(_)
            | Expr::SlotRadius(_) => Expr::constant(0.0),
            Expr::Add(a, b) => Expr::add(a.derivative(wrt), b.derivative(wrt)),
            Expr::Sub(a, b) => Expr::sub(a.derivative(wrt), b.derivative(wrt)),
            Expr::Mul(a, b) => Expr::add(
                Expr::mul(a.derivative(wrt), Rc::clone(b)),
                Expr::mul(Rc::clone(a), b.derivative(wrt)),
            ),
            Expr::Div(a, b) => Expr::div(
                Expr::sub(
                    Expr::mul(a.derivative(wrt), Rc::clone(b)),
                    Expr::mul(Rc::clone(a), b.derivative(wrt)),
                ),
                Expr::mul(Rc::clone(b), Rc::clone(b)),
            ),
            Expr::Sin(a) => Expr::mul(a.derivative(wrt), Expr::cos(Rc::clone(a))),
            Expr::Cos(a) => Expr::mul(
                Expr::mul(Expr::constant(-1.0), Expr::sin(Rc::clone(a))),
                a.derivative(wrt),
            ),
            Expr::Asin(a) => Expr::div(
                a.derivative(wrt),
                Expr::sqrt(Expr::sub(
                    Expr::constant(1.0),
                    Expr::sqr(Rc::clone(a)),
                )),
            ),
            Expr::Acos(a) => Expr::div(
                Expr::mul(Expr::constant(-1.0), a.derivative(wrt)),
                Expr::sqrt(Expr::sub(
                    Expr::constant(1.0),
                    Expr::sqr(Rc::clone(a)),
                )),
            ),
            Expr::Sqrt(a) => Expr::div(
                a.derivative(wrt),
                Expr::mul(Expr::constant(2.0), Expr::sqrt(Rc::clone(a))),
            ),
            Expr::Sqr(a) => Expr::mul(
                Expr::constant(2.0),
                Expr::mul(Rc::clone(a), a.derivative(wrt)),
            ),
        }
    }
}

/// Replaces every slot-indexed leaf with the direct parameter leaf it
/// currently resolves to; unresolvable leaves become `Const(0)`, matching
/// their evaluation behavior. Subtrees without slot leaves are shared, not
/// copied.
pub(crate) fn resolve_slots(expr: &Rc<Expr>, scope: &EvalScope<'_>) -> Rc<Expr> {
    match &**expr {
        Expr::Const(_) | Expr::Param(_) => Rc::clone(expr),
        Expr::SlotParam(slot) => match scope.pars.get(*slot as usize) {
            Some(&handle) if scope.params.contains(handle) => Expr::param(handle),
            _ => Expr::constant(0.0),
        },
        Expr::SlotPointX(slot) => match scope.slot_entity(*slot) {
            Some(Entity::Point { x, .. }) => Expr::param(*x),
            _ => Expr::constant(0.0),
        },
        Expr::SlotPointY(slot) => match scope.slot_entity(*slot) {
            Some(Entity::Point { y, .. }) => Expr::param(*y),
            _ => Expr::constant(0.0),
        },
        Expr::SlotRadius(slot) => match scope.slot_entity(*slot) {
            Some(Entity::Circle { radius, .. }) => Expr::param(*radius),
            _ => Expr::constant(0.0),
        },
        Expr::Add(a, b) => Expr::add(resolve_slots(a, scope), resolve_slots(b, scope)),
        Expr::Sub(a, b) => Expr::sub(resolve_slots(a, scope), resolve_slots(b, scope)),
        Expr::Mul(a, b) => Expr::mul(resolve_slots(a, scope), resolve_slots(b, scope)),
        Expr::Div(a, b) => Expr::div(resolve_slots(a, scope), resolve_slots(b, scope)),
        Expr::Sin(a) => Expr::sin(resolve_slots(a, scope)),
        Expr::Cos(a) => Expr::cos(resolve_slots(a, scope)),
        Expr::Asin(a) => Expr::asin(resolve_slots(a, scope)),
        Expr::Acos(a) => Expr::acos(resolve_slots(a, scope)),
        Expr::Sqrt(a) => Expr::sqrt(resolve_slots(a, scope)),
        Expr::Sqr(a) => Expr::sqr(resolve_slots(a, scope)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketch::Sketch;

    fn free_eval(sketch: &Sketch, expr: &Expr) -> f64 {
        sketch.eval_expr(expr)
    }

    #[test]
    fn test_eval_constant() {
        let sketch = Sketch::new();
        assert_eq!(free_eval(&sketch, &Expr::constant(2.5)), 2.5);
    }

    #[test]
    fn test_eval_param_leaf() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(4.0);
        assert_eq!(free_eval(&sketch, &Expr::param(p)), 4.0);
    }

    #[test]
    fn test_eval_stale_param_reads_zero() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(4.0);
        sketch.delete_parameter(p);
        assert_eq!(free_eval(&sketch, &Expr::param(p)), 0.0);
    }

    #[test]
    fn test_eval_operators() {
        let mut sketch = Sketch::new();
        let a = sketch.add_parameter(3.0);
        let b = sketch.add_parameter(4.0);
        let sum = Expr::add(Expr::param(a), Expr::param(b));
        assert_eq!(free_eval(&sketch, &sum), 7.0);
        let hyp = Expr::sqrt(Expr::add(
            Expr::sqr(Expr::param(a)),
            Expr::sqr(Expr::param(b)),
        ));
        assert!((free_eval(&sketch, &hyp) - 5.0).abs() < 1e-12);
        let ratio = Expr::div(Expr::param(a), Expr::param(b));
        assert!((free_eval(&sketch, &ratio) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_slot_leaves_read_zero_outside_constraint_scope() {
        let mut sketch = Sketch::new();
        sketch.add_point(3.0, 4.0);
        assert_eq!(free_eval(&sketch, &Expr::slot_param(0)), 0.0);
        assert_eq!(free_eval(&sketch, &Expr::point_x(0)), 0.0);
        assert_eq!(free_eval(&sketch, &Expr::point_y(0)), 0.0);
        assert_eq!(free_eval(&sketch, &Expr::radius(0)), 0.0);
    }

    #[test]
    fn test_scoped_eval_resolves_slot_leaves() {
        use crate::constraint::ConstraintDef;

        let mut sketch = Sketch::new();
        let p = sketch.add_point(3.0, 4.0);
        let d = sketch.add_fixed_parameter(5.0);
        let eq = Expr::add(
            Expr::add(Expr::point_x(0), Expr::point_y(0)),
            Expr::slot_param(0),
        );
        let c = sketch.add_constraint(
            ConstraintDef::general(eq)
                .with_entities(vec![p])
                .with_params(vec![d]),
        );
        assert_eq!(sketch.constraint_residual(c), Some(12.0));
    }

    #[test]
    fn test_scoped_eval_type_mismatch_reads_zero() {
        use crate::constraint::ConstraintDef;

        let mut sketch = Sketch::new();
        let p1 = sketch.add_point(1.0, 2.0);
        let p2 = sketch.add_point(3.0, 4.0);
        let line = sketch.add_line(p1, p2);
        // A line entity in a point-x slot, and an out-of-range slot.
        let eq = Expr::add(Expr::point_x(0), Expr::radius(9));
        let c = sketch.add_constraint(ConstraintDef::general(eq).with_entities(vec![line]));
        assert_eq!(sketch.constraint_residual(c), Some(0.0));
    }

    #[test]
    fn test_derivative_constant_is_zero() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(1.0);
        let d = Expr::constant(9.0).derivative(p);
        assert_eq!(free_eval(&sketch, &d), 0.0);
    }

    #[test]
    fn test_derivative_param_leaf() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(1.0);
        let q = sketch.add_parameter(2.0);
        assert_eq!(free_eval(&sketch, &Expr::param(p).derivative(p)), 1.0);
        assert_eq!(free_eval(&sketch, &Expr::param(p).derivative(q)), 0.0);
    }

    #[test]
    fn test_derivative_product_rule() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(3.0);
        let q = sketch.add_parameter(5.0);
        // d/dp (p * q) = q
        let d = Expr::mul(Expr::param(p), Expr::param(q)).derivative(p);
        assert!((free_eval(&sketch, &d) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_derivative_quotient_rule() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(3.0);
        let q = sketch.add_parameter(2.0);
        // d/dq (p / q) = -p / q^2 = -0.75
        let d = Expr::div(Expr::param(p), Expr::param(q)).derivative(q);
        assert!((free_eval(&sketch, &d) + 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_derivative_chain_rule_trig() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(0.3);
        // d/dp sin(2p) = 2 cos(2p)
        let two_p = Expr::mul(Expr::constant(2.0), Expr::param(p));
        let d = Expr::sin(two_p).derivative(p);
        let expected = 2.0 * (0.6f64).cos();
        assert!((free_eval(&sketch, &d) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_derivative_sqrt_and_sqr() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(4.0);
        // d/dp sqrt(p) = 1 / (2 sqrt(p)) = 0.25
        let d = Expr::sqrt(Expr::param(p)).derivative(p);
        assert!((free_eval(&sketch, &d) - 0.25).abs() < 1e-12);
        // d/dp p^2 = 2p = 8
        let d = Expr::sqr(Expr::param(p)).derivative(p);
        assert!((free_eval(&sketch, &d) - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_derivative_asin_acos() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(0.5);
        let expected = 1.0 / (1.0f64 - 0.25).sqrt();
        let d = Expr::asin(Expr::param(p)).derivative(p);
        assert!((free_eval(&sketch, &d) - expected).abs() < 1e-12);
        let d = Expr::acos(Expr::param(p)).derivative(p);
        assert!((free_eval(&sketch, &d) + expected).abs() < 1e-12);
    }

    #[test]
    fn test_derivative_slot_leaf_is_zero() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(1.0);
        let d = Expr::point_x(0).derivative(p);
        assert_eq!(free_eval(&sketch, &d), 0.0);
    }

    #[test]
    fn test_derivative_is_linear_over_add() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(1.7);
        let q = sketch.add_parameter(-0.4);
        let a = Expr::mul(Expr::param(p), Expr::param(q));
        let b = Expr::sqr(Expr::param(p));
        let combined = Expr::add(Rc::clone(&a), Rc::clone(&b)).derivative(p);
        let split = Expr::add(a.derivative(p), b.derivative(p));
        assert!((free_eval(&sketch, &combined) - free_eval(&sketch, &split)).abs() < 1e-12);
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(1.2);
        let q = sketch.add_parameter(0.7);
        // f = sin(p*q) + sqrt(p) * q^2
        let f = Expr::add(
            Expr::sin(Expr::mul(Expr::param(p), Expr::param(q))),
            Expr::mul(Expr::sqrt(Expr::param(p)), Expr::sqr(Expr::param(q))),
        );
        let analytic = free_eval(&sketch, &f.derivative(p));

        let h = 1e-6;
        sketch.set_param_value(p, 1.2 + h);
        let plus = free_eval(&sketch, &f);
        sketch.set_param_value(p, 1.2 - h);
        let minus = free_eval(&sketch, &f);
        let numeric = (plus - minus) / (2.0 * h);
        assert!(
            (analytic - numeric).abs() < 1e-6,
            "analytic {analytic} vs numeric {numeric}"
        );
    }

    #[test]
    fn test_derivative_shares_operands_with_source() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(2.0);
        let q = sketch.add_parameter(3.0);
        let product = Expr::mul(Expr::param(p), Expr::param(q));
        let d = product.derivative(p);
        // Dropping the derivative must leave the source tree evaluable.
        drop(d);
        assert!((free_eval(&sketch, &product) - 6.0).abs() < 1e-12);
    }
}
