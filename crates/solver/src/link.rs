//! Relinking: building the dense solver-side view of the live sketch.

use tracing::debug;

use crate::expr::{resolve_slots, EvalScope};
use crate::sketch::Sketch;
use crate::{ConstraintHandle, ParamHandle};

/// Dense scratch the solve loop runs against. Rebuilt by [`relink`] whenever
/// the set of live parameters or constraints has changed; sized to the live
/// counts and reused across iterations.
#[derive(Debug, Default)]
pub(crate) struct LinkedState {
    /// Live constraints in slot order.
    pub constraints: Vec<ConstraintHandle>,
    /// Live free (non-pinned) parameters in slot order.
    pub params: Vec<ParamHandle>,
    /// Normal matrix J·Jᵀ, m×m, column-major.
    pub normal: Vec<f64>,
    /// Intermediate solution of the normal system.
    pub solution: Vec<f64>,
    /// Free-parameter snapshot taken at the start of a solve.
    pub cached_params: Vec<f64>,
}

/// Rebuilds the linked scratch if it is outdated.
///
/// Slot order fixes the constraint/parameter numbering for the duration of a
/// solve. Each constraint's equation has its slot-indexed leaves expanded to
/// the direct parameter leaves they currently resolve to, then is
/// differentiated once per live free parameter; the old derivative trees are
/// dropped with the rows they lived in.
pub(crate) fn relink(sketch: &mut Sketch) {
    if !sketch.link_outdated {
        return;
    }

    let Sketch {
        params,
        entities,
        constraints,
        link_outdated,
        linked,
    } = sketch;

    linked.params.clear();
    linked
        .params
        .extend(params.iter().filter(|(_, p)| !p.fixed).map(|(h, _)| h));
    linked.constraints.clear();
    linked.constraints.extend(constraints.keys());

    let m = linked.constraints.len();
    let n = linked.params.len();

    for (_, cons) in constraints.iter_mut() {
        let scope = EvalScope::new(params, entities, &cons.entities, &cons.params);
        let expanded = resolve_slots(&cons.eq, &scope);
        cons.row.err = 0.0;
        cons.row.dervs = linked
            .params
            .iter()
            .map(|&p| expanded.derivative(p))
            .collect();
        cons.row.dervs_y = vec![0.0; n];
    }

    linked.normal.clear();
    linked.normal.resize(m * m, 0.0);
    linked.solution.clear();
    linked.solution.resize(m, 0.0);
    linked.cached_params.clear();
    linked.cached_params.resize(n, 0.0);

    *link_outdated = false;
    debug!(constraints = m, params = n, "relinked sketch");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ConstraintDef;
    use crate::expr::Expr;

    #[test]
    fn test_relink_builds_dense_view() {
        let mut sketch = Sketch::new();
        let a = sketch.add_parameter(1.0);
        let b = sketch.add_parameter(2.0);
        let _pinned = sketch.add_fixed_parameter(5.0);
        sketch.add_constraint(ConstraintDef::general(Expr::sub(
            Expr::param(a),
            Expr::param(b),
        )));

        relink(&mut sketch);
        assert!(!sketch.link_outdated);
        assert_eq!(sketch.linked.constraints.len(), 1);
        assert_eq!(sketch.linked.params.len(), 2, "pinned parameter is excluded");
        assert_eq!(sketch.linked.normal.len(), 1);
        assert_eq!(sketch.linked.cached_params.len(), 2);

        let cons = sketch.constraints.get(sketch.linked.constraints[0]).unwrap();
        assert_eq!(cons.row.dervs.len(), 2);
        assert_eq!(cons.row.dervs_y.len(), 2);
    }

    #[test]
    fn test_relink_is_a_noop_when_clean() {
        let mut sketch = Sketch::new();
        sketch.add_parameter(1.0);
        relink(&mut sketch);
        let params_before = sketch.linked.params.clone();
        relink(&mut sketch);
        assert_eq!(sketch.linked.params, params_before);
    }

    #[test]
    fn test_expansion_gives_slot_constraints_exact_partials() {
        let mut sketch = Sketch::new();
        let p = sketch.add_point(3.0, 0.0);
        let (x, _) = sketch.point_params(p).unwrap();
        // Residual x - 7 through a slot-indexed leaf.
        sketch.add_constraint(
            ConstraintDef::general(Expr::sub(Expr::point_x(0), Expr::constant(7.0)))
                .with_entities(vec![p]),
        );

        relink(&mut sketch);
        let j = sketch
            .linked
            .params
            .iter()
            .position(|&h| h == x)
            .expect("x is live");
        let cons = sketch.constraints.get(sketch.linked.constraints[0]).unwrap();
        let value = sketch.eval_expr(&cons.row.dervs[j]);
        assert_eq!(value, 1.0, "expanded leaf differentiates exactly");
    }

    #[test]
    fn test_unresolvable_slot_expands_to_zero() {
        let mut sketch = Sketch::new();
        let p = sketch.add_parameter(1.0);
        // Slot 3 is out of range of the (empty) entity slots.
        sketch.add_constraint(ConstraintDef::general(Expr::add(
            Expr::point_x(3),
            Expr::param(p),
        )));

        relink(&mut sketch);
        let cons = sketch.constraints.get(sketch.linked.constraints[0]).unwrap();
        assert_eq!(sketch.eval_expr(&cons.row.dervs[0]), 1.0);
    }
}
