//! 2D parametric sketch constraint solving.
//!
//! A [`Sketch`] owns three generational tables: parameters (free scalars),
//! entities (points, lines, circles, arcs referencing parameters and each
//! other by handle), and constraints (symbolic equations that must evaluate
//! to zero). Solving assembles a Jacobian from analytic derivatives of the
//! constraint equations and iterates Gauss-Newton normal-equation steps,
//! with pivoted Gaussian elimination as the linear backend.
//!
//! Constraint equations are [`Expr`] trees. Leaves either name a parameter
//! directly by handle or index into the owning constraint's entity/parameter
//! slot arrays, so one equation template can be shared across many
//! constraint instances. The [`catalog`] module builds the usual named
//! constraints (horizontal, parallel, tangent, ...) on top of that template
//! mechanism; the solver core itself only knows the general equation form.

pub mod catalog;
pub mod constraint;
pub mod expr;
mod link;
pub mod sketch;
pub mod solver;

pub use freehand_arena::{SlotKey, SlotTable, INVALID_INDEX};

pub use constraint::{
    Constraint, ConstraintDef, ConstraintKind, DefinitionError, Entity, MAX_CONSTRAINT_SLOTS,
};
pub use expr::Expr;
pub use sketch::{Parameter, Sketch};
pub use solver::{solve_sketch, SolveError, SolveOptions, SolveReport};

freehand_arena::new_handle_type! {
    /// Identifies a parameter in a sketch.
    pub struct ParamHandle;
    /// Identifies an entity in a sketch.
    pub struct EntityHandle;
    /// Identifies a constraint in a sketch.
    pub struct ConstraintHandle;
}

// ── Solver Trait ────────────────────────────────────────────────────────────

/// Trait abstracting the sketch constraint solver.
///
/// This enables mock solver implementations for testing and allows
/// alternative solver backends to be swapped in.
pub trait SketchSolver {
    /// Solve the sketch's constraints, mutating its parameters in place.
    fn solve(&self, sketch: &mut Sketch) -> Result<SolveReport, SolveError>;
}

/// The default solver: undamped Gauss-Newton over the normal equations.
pub struct GaussNewtonSolver {
    options: SolveOptions,
}

impl GaussNewtonSolver {
    /// Create a solver with default options.
    pub fn new() -> Self {
        Self {
            options: SolveOptions::default(),
        }
    }

    /// Create a solver with custom options.
    pub fn with_options(options: SolveOptions) -> Self {
        Self { options }
    }
}

impl Default for GaussNewtonSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SketchSolver for GaussNewtonSolver {
    fn solve(&self, sketch: &mut Sketch) -> Result<SolveReport, SolveError> {
        solve_sketch(sketch, &self.options)
    }
}

#[cfg(test)]
mod trait_tests {
    use super::*;

    #[test]
    fn test_sketch_solver_trait_solve() {
        let solver = GaussNewtonSolver::new();
        let mut sketch = Sketch::new();
        let a = sketch.add_parameter(0.0);
        let b = sketch.add_parameter(10.0);
        sketch.add_constraint(ConstraintDef::general(Expr::sub(
            Expr::param(a),
            Expr::param(b),
        )));

        let report = solver.solve(&mut sketch).expect("should converge");
        assert!(report.max_residual <= 1e-6);
        let va = sketch.param_value(a).unwrap();
        let vb = sketch.param_value(b).unwrap();
        assert!((va - vb).abs() <= 1e-6);
    }

    #[test]
    fn test_sketch_solver_with_custom_options() {
        let solver = GaussNewtonSolver::with_options(SolveOptions {
            max_steps: 64,
            ..SolveOptions::default()
        });
        let mut sketch = Sketch::new();
        let a = sketch.add_parameter(3.0);
        sketch.add_constraint(ConstraintDef::general(Expr::sub(
            Expr::param(a),
            Expr::constant(11.0),
        )));

        assert!(solver.solve(&mut sketch).is_ok());
        assert!((sketch.param_value(a).unwrap() - 11.0).abs() <= 1e-6);
    }
}
