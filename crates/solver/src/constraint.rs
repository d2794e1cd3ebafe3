//! Entity and constraint data model.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::Expr;
use crate::{EntityHandle, ParamHandle};

/// Maximum entity/parameter slots a single constraint may bind.
pub const MAX_CONSTRAINT_SLOTS: usize = 16;

/// A 2D geometric entity.
///
/// Entities reference parameters and other entities by handle; the reference
/// is logical, not owning, so the same point may belong to several lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entity {
    /// A point with its x/y coordinate parameters.
    Point { x: ParamHandle, y: ParamHandle },
    /// A line segment between two point entities.
    Line { p1: EntityHandle, p2: EntityHandle },
    /// A circle: center point entity plus a radius parameter.
    Circle {
        center: EntityHandle,
        radius: ParamHandle,
    },
    /// A three-point arc.
    Arc {
        p1: EntityHandle,
        p2: EntityHandle,
        p3: EntityHandle,
    },
}

/// Constraint kinds. The core solves only the general equation form; the
/// enum leaves room for hosts that tag richer kinds onto their constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    General,
}

/// Definition of a constraint: one scalar equation plus the slot arrays its
/// indexed leaves resolve against.
///
/// The core does not check that the equation's slot indices and the slot
/// arrays agree; a mismatch surfaces as a 0-valued subexpression at
/// evaluation time.
#[derive(Debug, Clone)]
pub struct ConstraintDef {
    pub kind: ConstraintKind,
    /// Residual expression; the solver drives its value to zero.
    pub eq: Rc<Expr>,
    /// Entity slots referenced by `SlotPointX`/`SlotPointY`/`SlotRadius` leaves.
    pub entities: Vec<EntityHandle>,
    /// Parameter slots referenced by `SlotParam` leaves.
    pub params: Vec<ParamHandle>,
}

impl ConstraintDef {
    /// A general equation constraint with empty slot arrays.
    pub fn general(eq: Rc<Expr>) -> Self {
        Self {
            kind: ConstraintKind::General,
            eq,
            entities: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn with_entities(mut self, entities: Vec<EntityHandle>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_params(mut self, params: Vec<ParamHandle>) -> Self {
        self.params = params;
        self
    }
}

/// Solver-private row of a constraint: latest residual plus the symbolic
/// partials (one per live free parameter) and their evaluated values.
/// Rebuilt on every relink.
#[derive(Debug, Clone, Default)]
pub(crate) struct JacobianRow {
    pub err: f64,
    pub dervs: Vec<Rc<Expr>>,
    pub dervs_y: Vec<f64>,
}

/// A live constraint: its definition plus solver scratch.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub eq: Rc<Expr>,
    pub entities: Vec<EntityHandle>,
    pub params: Vec<ParamHandle>,
    pub(crate) row: JacobianRow,
}

impl Constraint {
    pub(crate) fn from_def(def: ConstraintDef) -> Self {
        Self {
            kind: def.kind,
            eq: def.eq,
            entities: def.entities,
            params: def.params,
            row: JacobianRow::default(),
        }
    }

    /// Residual recorded by the most recent solver evaluation.
    pub fn last_residual(&self) -> f64 {
        self.row.err
    }
}

/// Rejected parameter, entity, or constraint definitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("referenced handle is stale or unknown")]
    StaleReference,
    #[error("entity reference must resolve to a point")]
    NotAPoint,
    #[error("entity reference must resolve to a line")]
    NotALine,
    #[error("entity reference must resolve to a circle")]
    NotACircle,
    #[error("constraint binds {count} entity slots (limit {MAX_CONSTRAINT_SLOTS})")]
    TooManyEntitySlots { count: usize },
    #[error("constraint binds {count} parameter slots (limit {MAX_CONSTRAINT_SLOTS})")]
    TooManyParamSlots { count: usize },
    #[error("slot table is full")]
    TableFull,
}
