//! The sketch store: parameters, entities, constraints, and the dirty flag
//! that gates relinking.

use serde::{Deserialize, Serialize};

use freehand_arena::SlotTable;

use crate::constraint::{
    Constraint, ConstraintDef, DefinitionError, Entity, MAX_CONSTRAINT_SLOTS,
};
use crate::expr::{EvalScope, Expr};
use crate::link::LinkedState;
use crate::solver::{solve_sketch, SolveError, SolveOptions, SolveReport};
use crate::{ConstraintHandle, EntityHandle, ParamHandle};

/// A single solver-driven scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub value: f64,
    /// Pinned parameters keep their value; the solver never treats them as
    /// free. Driving dimensions (distances, angles) are usually pinned.
    pub fixed: bool,
}

impl Parameter {
    pub fn free(value: f64) -> Self {
        Self {
            value,
            fixed: false,
        }
    }

    pub fn fixed(value: f64) -> Self {
        Self { value, fixed: true }
    }
}

/// A 2D parametric sketch.
///
/// Owns three generational tables plus the solver-side scratch that is
/// rebuilt whenever the set of live parameters or constraints changes
/// (`link_outdated`). Deleting a parameter or entity never cascades:
/// constraints that still reference it evaluate the dangling subtree to 0.
#[derive(Debug)]
pub struct Sketch {
    pub(crate) params: SlotTable<ParamHandle, Parameter>,
    pub(crate) entities: SlotTable<EntityHandle, Entity>,
    pub(crate) constraints: SlotTable<ConstraintHandle, Constraint>,
    pub(crate) link_outdated: bool,
    pub(crate) linked: LinkedState,
}

impl Sketch {
    pub fn new() -> Self {
        Self::with_capacity(0, 0, 0)
    }

    /// Create a sketch with pre-allocated table capacities.
    pub fn with_capacity(params: u16, entities: u16, constraints: u16) -> Self {
        Self {
            params: SlotTable::with_capacity(params),
            entities: SlotTable::with_capacity(entities),
            constraints: SlotTable::with_capacity(constraints),
            link_outdated: true,
            linked: LinkedState::default(),
        }
    }

    /// True while the solver scratch is stale; the next solve relinks first.
    pub fn needs_relink(&self) -> bool {
        self.link_outdated
    }

    // ── Parameters ──────────────────────────────────────────────────────────

    pub fn try_add_parameter(
        &mut self,
        param: Parameter,
    ) -> Result<ParamHandle, DefinitionError> {
        let handle = self.params.insert(param);
        if !handle.is_valid() {
            return Err(DefinitionError::TableFull);
        }
        self.link_outdated = true;
        Ok(handle)
    }

    /// Add a free parameter; returns the invalid handle if the table is full.
    pub fn add_parameter(&mut self, value: f64) -> ParamHandle {
        self.try_add_parameter(Parameter::free(value))
            .unwrap_or(ParamHandle::INVALID)
    }

    /// Add a pinned parameter the solver will not adjust.
    pub fn add_fixed_parameter(&mut self, value: f64) -> ParamHandle {
        self.try_add_parameter(Parameter::fixed(value))
            .unwrap_or(ParamHandle::INVALID)
    }

    pub fn delete_parameter(&mut self, handle: ParamHandle) -> bool {
        let removed = self.params.remove(handle).is_some();
        if removed {
            self.link_outdated = true;
        }
        removed
    }

    pub fn parameter(&self, handle: ParamHandle) -> Option<&Parameter> {
        self.params.get(handle)
    }

    pub fn param_value(&self, handle: ParamHandle) -> Option<f64> {
        self.params.get(handle).map(|p| p.value)
    }

    /// Overwrite a parameter's value. Value edits do not outdate the link.
    pub fn set_param_value(&mut self, handle: ParamHandle, value: f64) -> bool {
        match self.params.get_mut(handle) {
            Some(param) => {
                param.value = value;
                true
            }
            None => false,
        }
    }

    /// Pin or release a parameter. Changes the live free-parameter set, so
    /// the link goes stale.
    pub fn set_param_fixed(&mut self, handle: ParamHandle, fixed: bool) -> bool {
        match self.params.get_mut(handle) {
            Some(param) => {
                param.fixed = fixed;
                self.link_outdated = true;
                true
            }
            None => false,
        }
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    // ── Entities ────────────────────────────────────────────────────────────

    pub fn try_add_entity(&mut self, def: Entity) -> Result<EntityHandle, DefinitionError> {
        self.validate_entity(&def)?;
        let handle = self.entities.insert(def);
        if !handle.is_valid() {
            return Err(DefinitionError::TableFull);
        }
        self.link_outdated = true;
        Ok(handle)
    }

    /// Add an entity; returns the invalid handle on a rejected definition.
    pub fn add_entity(&mut self, def: Entity) -> EntityHandle {
        self.try_add_entity(def).unwrap_or(EntityHandle::INVALID)
    }

    pub fn delete_entity(&mut self, handle: EntityHandle) -> bool {
        let removed = self.entities.remove(handle).is_some();
        if removed {
            self.link_outdated = true;
        }
        removed
    }

    pub fn entity(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities.get(handle)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    fn validate_entity(&self, def: &Entity) -> Result<(), DefinitionError> {
        match def {
            Entity::Point { x, y } => {
                if !self.params.contains(*x) || !self.params.contains(*y) {
                    return Err(DefinitionError::StaleReference);
                }
            }
            Entity::Line { p1, p2 } => {
                self.require_point(*p1)?;
                self.require_point(*p2)?;
            }
            Entity::Circle { center, radius } => {
                self.require_point(*center)?;
                if !self.params.contains(*radius) {
                    return Err(DefinitionError::StaleReference);
                }
            }
            Entity::Arc { p1, p2, p3 } => {
                self.require_point(*p1)?;
                self.require_point(*p2)?;
                self.require_point(*p3)?;
            }
        }
        Ok(())
    }

    fn require_point(&self, handle: EntityHandle) -> Result<(), DefinitionError> {
        match self.entities.get(handle) {
            Some(Entity::Point { .. }) => Ok(()),
            Some(_) => Err(DefinitionError::NotAPoint),
            None => Err(DefinitionError::StaleReference),
        }
    }

    // ── Constraints ─────────────────────────────────────────────────────────

    pub fn try_add_constraint(
        &mut self,
        def: ConstraintDef,
    ) -> Result<ConstraintHandle, DefinitionError> {
        if def.entities.len() > MAX_CONSTRAINT_SLOTS {
            return Err(DefinitionError::TooManyEntitySlots {
                count: def.entities.len(),
            });
        }
        if def.params.len() > MAX_CONSTRAINT_SLOTS {
            return Err(DefinitionError::TooManyParamSlots {
                count: def.params.len(),
            });
        }
        let handle = self.constraints.insert(Constraint::from_def(def));
        if !handle.is_valid() {
            return Err(DefinitionError::TableFull);
        }
        self.link_outdated = true;
        Ok(handle)
    }

    /// Add a constraint; returns the invalid handle on a rejected definition.
    pub fn add_constraint(&mut self, def: ConstraintDef) -> ConstraintHandle {
        self.try_add_constraint(def)
            .unwrap_or(ConstraintHandle::INVALID)
    }

    /// Add one constraint per definition, in order. Multi-equation builders
    /// in [`crate::catalog`] return several definitions per call.
    pub fn add_constraints(
        &mut self,
        defs: impl IntoIterator<Item = ConstraintDef>,
    ) -> Vec<ConstraintHandle> {
        defs.into_iter().map(|def| self.add_constraint(def)).collect()
    }

    pub fn delete_constraint(&mut self, handle: ConstraintHandle) -> bool {
        let removed = self.constraints.remove(handle).is_some();
        if removed {
            self.link_outdated = true;
        }
        removed
    }

    pub fn constraint(&self, handle: ConstraintHandle) -> Option<&Constraint> {
        self.constraints.get(handle)
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    // ── Convenience factories ───────────────────────────────────────────────

    /// Add a point, creating its two coordinate parameters.
    pub fn add_point(&mut self, x: f64, y: f64) -> EntityHandle {
        let px = self.add_parameter(x);
        let py = self.add_parameter(y);
        self.add_entity(Entity::Point { x: px, y: py })
    }

    /// Add a line between two existing point entities.
    pub fn add_line(&mut self, p1: EntityHandle, p2: EntityHandle) -> EntityHandle {
        self.add_entity(Entity::Line { p1, p2 })
    }

    /// Add a circle around an existing point, creating the radius parameter.
    pub fn add_circle(&mut self, center: EntityHandle, radius: f64) -> EntityHandle {
        let r = self.add_parameter(radius);
        self.add_entity(Entity::Circle { center, radius: r })
    }

    /// Add a three-point arc over existing point entities.
    pub fn add_arc(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        p3: EntityHandle,
    ) -> EntityHandle {
        self.add_entity(Entity::Arc { p1, p2, p3 })
    }

    // ── Geometry accessors ──────────────────────────────────────────────────

    /// Coordinate parameter handles of a point entity.
    pub fn point_params(&self, handle: EntityHandle) -> Option<(ParamHandle, ParamHandle)> {
        match self.entities.get(handle)? {
            Entity::Point { x, y } => Some((*x, *y)),
            _ => None,
        }
    }

    pub fn point_position(&self, handle: EntityHandle) -> Option<(f64, f64)> {
        let (x, y) = self.point_params(handle)?;
        Some((self.param_value(x)?, self.param_value(y)?))
    }

    pub fn set_point_position(&mut self, handle: EntityHandle, x: f64, y: f64) -> bool {
        match self.point_params(handle) {
            Some((px, py)) => self.set_param_value(px, x) && self.set_param_value(py, y),
            None => false,
        }
    }

    pub fn circle_radius(&self, handle: EntityHandle) -> Option<f64> {
        match self.entities.get(handle)? {
            Entity::Circle { radius, .. } => self.param_value(*radius),
            _ => None,
        }
    }

    // ── Evaluation ──────────────────────────────────────────────────────────

    /// Evaluate an expression outside any constraint scope: direct parameter
    /// leaves resolve against this sketch, slot-indexed leaves read 0.
    pub fn eval_expr(&self, expr: &Expr) -> f64 {
        expr.eval(&EvalScope::new(&self.params, &self.entities, &[], &[]))
    }

    /// Evaluate a constraint's equation against its slot arrays.
    pub fn constraint_residual(&self, handle: ConstraintHandle) -> Option<f64> {
        let cons = self.constraints.get(handle)?;
        Some(cons.eq.eval(&EvalScope::new(
            &self.params,
            &self.entities,
            &cons.entities,
            &cons.params,
        )))
    }

    // ── Solving ─────────────────────────────────────────────────────────────

    /// Solve with the given tolerance and step bound; true iff every
    /// residual magnitude ends within `tolerance`. Parameters are mutated in
    /// place either way.
    pub fn solve(&mut self, tolerance: f64, max_steps: u32) -> bool {
        self.solve_with(&SolveOptions {
            tolerance,
            max_steps,
            ..SolveOptions::default()
        })
        .is_ok()
    }

    /// Solve with full options, reporting iterations and the final residual.
    pub fn solve_with(&mut self, options: &SolveOptions) -> Result<SolveReport, SolveError> {
        solve_sketch(self, options)
    }
}

impl Default for Sketch {
    fn default() -> Self {
        Self::new()
    }
}
