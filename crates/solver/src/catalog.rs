//! Builders for the usual named sketch constraints.
//!
//! The solver core only knows the general equation constraint; everything
//! here is host-side sugar over the public expression factories. Each
//! builder returns the scalar equations of the constraint as one
//! [`ConstraintDef`] per equation, built entirely from slot-indexed leaves,
//! so the equation templates are independent of the concrete handles bound
//! in the slot arrays.
//!
//! Dimension arguments (`distance`, `angle_between`) take a parameter
//! handle; hosts normally create it pinned
//! ([`Sketch::add_fixed_parameter`]) so the solver moves the geometry, not
//! the dimension.

use std::rc::Rc;

use crate::constraint::{ConstraintDef, DefinitionError, Entity};
use crate::expr::Expr;
use crate::sketch::Sketch;
use crate::{EntityHandle, ParamHandle};

fn require_point(sketch: &Sketch, handle: EntityHandle) -> Result<(), DefinitionError> {
    match sketch.entity(handle) {
        Some(Entity::Point { .. }) => Ok(()),
        Some(_) => Err(DefinitionError::NotAPoint),
        None => Err(DefinitionError::StaleReference),
    }
}

fn require_param(sketch: &Sketch, handle: ParamHandle) -> Result<(), DefinitionError> {
    if sketch.parameter(handle).is_some() {
        Ok(())
    } else {
        Err(DefinitionError::StaleReference)
    }
}

fn line_points(
    sketch: &Sketch,
    handle: EntityHandle,
) -> Result<(EntityHandle, EntityHandle), DefinitionError> {
    match sketch.entity(handle) {
        Some(Entity::Line { p1, p2 }) => Ok((*p1, *p2)),
        Some(_) => Err(DefinitionError::NotALine),
        None => Err(DefinitionError::StaleReference),
    }
}

fn circle_center(
    sketch: &Sketch,
    handle: EntityHandle,
) -> Result<EntityHandle, DefinitionError> {
    match sketch.entity(handle) {
        Some(Entity::Circle { center, .. }) => Ok(*center),
        Some(_) => Err(DefinitionError::NotACircle),
        None => Err(DefinitionError::StaleReference),
    }
}

/// Two points at the same location: `x1 - x2 = 0`, `y1 - y2 = 0`.
pub fn coincident(
    sketch: &Sketch,
    p1: EntityHandle,
    p2: EntityHandle,
) -> Result<Vec<ConstraintDef>, DefinitionError> {
    require_point(sketch, p1)?;
    require_point(sketch, p2)?;
    Ok(vec![
        ConstraintDef::general(Expr::sub(Expr::point_x(0), Expr::point_x(1)))
            .with_entities(vec![p1, p2]),
        ConstraintDef::general(Expr::sub(Expr::point_y(0), Expr::point_y(1)))
            .with_entities(vec![p1, p2]),
    ])
}

/// Two points share a y coordinate: `y1 - y2 = 0`.
pub fn horizontal(
    sketch: &Sketch,
    p1: EntityHandle,
    p2: EntityHandle,
) -> Result<Vec<ConstraintDef>, DefinitionError> {
    require_point(sketch, p1)?;
    require_point(sketch, p2)?;
    Ok(vec![ConstraintDef::general(Expr::sub(
        Expr::point_y(0),
        Expr::point_y(1),
    ))
    .with_entities(vec![p1, p2])])
}

/// Two points share an x coordinate: `x1 - x2 = 0`.
pub fn vertical(
    sketch: &Sketch,
    p1: EntityHandle,
    p2: EntityHandle,
) -> Result<Vec<ConstraintDef>, DefinitionError> {
    require_point(sketch, p1)?;
    require_point(sketch, p2)?;
    Ok(vec![ConstraintDef::general(Expr::sub(
        Expr::point_x(0),
        Expr::point_x(1),
    ))
    .with_entities(vec![p1, p2])])
}

/// Point lies on the infinite line through a line's endpoints:
/// `(bx-ax)·(py-ay) - (by-ay)·(px-ax) = 0`.
///
/// Slots: 0 = point, 1 = line start, 2 = line end.
pub fn point_on_line(
    sketch: &Sketch,
    point: EntityHandle,
    line: EntityHandle,
) -> Result<Vec<ConstraintDef>, DefinitionError> {
    require_point(sketch, point)?;
    let (a, b) = line_points(sketch, line)?;
    let eq = Expr::sub(
        Expr::mul(
            Expr::sub(Expr::point_x(2), Expr::point_x(1)),
            Expr::sub(Expr::point_y(0), Expr::point_y(1)),
        ),
        Expr::mul(
            Expr::sub(Expr::point_y(2), Expr::point_y(1)),
            Expr::sub(Expr::point_x(0), Expr::point_x(1)),
        ),
    );
    Ok(vec![ConstraintDef::general(eq).with_entities(vec![point, a, b])])
}

/// Point lies on a circle: `(px-cx)² + (py-cy)² - r² = 0`.
///
/// Slots: 0 = point, 1 = circle, 2 = circle center.
pub fn point_on_circle(
    sketch: &Sketch,
    point: EntityHandle,
    circle: EntityHandle,
) -> Result<Vec<ConstraintDef>, DefinitionError> {
    require_point(sketch, point)?;
    let center = circle_center(sketch, circle)?;
    let eq = Expr::sub(
        Expr::add(
            Expr::sqr(Expr::sub(Expr::point_x(0), Expr::point_x(2))),
            Expr::sqr(Expr::sub(Expr::point_y(0), Expr::point_y(2))),
        ),
        Expr::sqr(Expr::radius(1)),
    );
    Ok(vec![
        ConstraintDef::general(eq).with_entities(vec![point, circle, center]),
    ])
}

/// Line is tangent to a circle: `cross² - r²·|d|² = 0`, where `cross` is the
/// line-direction × center-offset product and `d` the line direction.
///
/// Slots: 0 = line start, 1 = line end, 2 = circle center, 3 = circle.
pub fn line_tangent_to_circle(
    sketch: &Sketch,
    line: EntityHandle,
    circle: EntityHandle,
) -> Result<Vec<ConstraintDef>, DefinitionError> {
    let (a, b) = line_points(sketch, line)?;
    let center = circle_center(sketch, circle)?;
    let cross = Expr::sub(
        Expr::mul(
            Expr::sub(Expr::point_x(1), Expr::point_x(0)),
            Expr::sub(Expr::point_y(2), Expr::point_y(0)),
        ),
        Expr::mul(
            Expr::sub(Expr::point_y(1), Expr::point_y(0)),
            Expr::sub(Expr::point_x(2), Expr::point_x(0)),
        ),
    );
    let length_sq = Expr::add(
        Expr::sqr(Expr::sub(Expr::point_x(1), Expr::point_x(0))),
        Expr::sqr(Expr::sub(Expr::point_y(1), Expr::point_y(0))),
    );
    let eq = Expr::sub(
        Expr::sqr(cross),
        Expr::mul(Expr::sqr(Expr::radius(3)), length_sq),
    );
    Ok(vec![
        ConstraintDef::general(eq).with_entities(vec![a, b, center, circle]),
    ])
}

/// Line directions are parallel: `dy1·dx2 - dy2·dx1 = 0`.
///
/// Slots: 0,1 = first line's endpoints; 2,3 = second line's endpoints.
pub fn parallel(
    sketch: &Sketch,
    l1: EntityHandle,
    l2: EntityHandle,
) -> Result<Vec<ConstraintDef>, DefinitionError> {
    let (a1, b1) = line_points(sketch, l1)?;
    let (a2, b2) = line_points(sketch, l2)?;
    let eq = Expr::sub(
        Expr::mul(
            Expr::sub(Expr::point_y(1), Expr::point_y(0)),
            Expr::sub(Expr::point_x(3), Expr::point_x(2)),
        ),
        Expr::mul(
            Expr::sub(Expr::point_y(3), Expr::point_y(2)),
            Expr::sub(Expr::point_x(1), Expr::point_x(0)),
        ),
    );
    Ok(vec![
        ConstraintDef::general(eq).with_entities(vec![a1, b1, a2, b2]),
    ])
}

/// Line directions are perpendicular: `dy1·dy2 + dx1·dx2 = 0`.
///
/// Slots: 0,1 = first line's endpoints; 2,3 = second line's endpoints.
pub fn perpendicular(
    sketch: &Sketch,
    l1: EntityHandle,
    l2: EntityHandle,
) -> Result<Vec<ConstraintDef>, DefinitionError> {
    let (a1, b1) = line_points(sketch, l1)?;
    let (a2, b2) = line_points(sketch, l2)?;
    let eq = Expr::add(
        Expr::mul(
            Expr::sub(Expr::point_y(1), Expr::point_y(0)),
            Expr::sub(Expr::point_y(3), Expr::point_y(2)),
        ),
        Expr::mul(
            Expr::sub(Expr::point_x(1), Expr::point_x(0)),
            Expr::sub(Expr::point_x(3), Expr::point_x(2)),
        ),
    );
    Ok(vec![
        ConstraintDef::general(eq).with_entities(vec![a1, b1, a2, b2]),
    ])
}

/// `mid` is the midpoint of `p1` and `p2`: `mid - (p1 + p2)/2 = 0` per axis.
///
/// Slots: 0 = p1, 1 = mid, 2 = p2.
pub fn midpoint(
    sketch: &Sketch,
    p1: EntityHandle,
    mid: EntityHandle,
    p2: EntityHandle,
) -> Result<Vec<ConstraintDef>, DefinitionError> {
    require_point(sketch, p1)?;
    require_point(sketch, mid)?;
    require_point(sketch, p2)?;
    let eq_x = Expr::sub(
        Expr::point_x(1),
        Expr::div(
            Expr::add(Expr::point_x(0), Expr::point_x(2)),
            Expr::constant(2.0),
        ),
    );
    let eq_y = Expr::sub(
        Expr::point_y(1),
        Expr::div(
            Expr::add(Expr::point_y(0), Expr::point_y(2)),
            Expr::constant(2.0),
        ),
    );
    Ok(vec![
        ConstraintDef::general(eq_x).with_entities(vec![p1, mid, p2]),
        ConstraintDef::general(eq_y).with_entities(vec![p1, mid, p2]),
    ])
}

/// Angle between two line directions equals the parameter (radians):
/// `acos(dot/(|d1|·|d2|)) - θ = 0`.
///
/// Entity slots: 0,1 = first line's endpoints; 2,3 = second line's
/// endpoints. Parameter slot 0 = θ.
pub fn angle_between(
    sketch: &Sketch,
    l1: EntityHandle,
    l2: EntityHandle,
    angle: ParamHandle,
) -> Result<Vec<ConstraintDef>, DefinitionError> {
    let (a1, b1) = line_points(sketch, l1)?;
    let (a2, b2) = line_points(sketch, l2)?;
    require_param(sketch, angle)?;

    let dx1 = Expr::sub(Expr::point_x(1), Expr::point_x(0));
    let dy1 = Expr::sub(Expr::point_y(1), Expr::point_y(0));
    let dx2 = Expr::sub(Expr::point_x(3), Expr::point_x(2));
    let dy2 = Expr::sub(Expr::point_y(3), Expr::point_y(2));

    let dot = Expr::add(
        Expr::mul(Rc::clone(&dx1), Rc::clone(&dx2)),
        Expr::mul(Rc::clone(&dy1), Rc::clone(&dy2)),
    );
    let len1 = Expr::sqrt(Expr::add(Expr::sqr(dx1), Expr::sqr(dy1)));
    let len2 = Expr::sqrt(Expr::add(Expr::sqr(dx2), Expr::sqr(dy2)));
    let eq = Expr::sub(
        Expr::acos(Expr::div(dot, Expr::mul(len1, len2))),
        Expr::slot_param(0),
    );
    Ok(vec![ConstraintDef::general(eq)
        .with_entities(vec![a1, b1, a2, b2])
        .with_params(vec![angle])])
}

/// Squared distance between two points equals the squared parameter:
/// `(x2-x1)² + (y2-y1)² - d² = 0`.
///
/// Entity slots: 0 = p1, 1 = p2. Parameter slot 0 = d.
pub fn distance(
    sketch: &Sketch,
    p1: EntityHandle,
    p2: EntityHandle,
    dist: ParamHandle,
) -> Result<Vec<ConstraintDef>, DefinitionError> {
    require_point(sketch, p1)?;
    require_point(sketch, p2)?;
    require_param(sketch, dist)?;
    let eq = Expr::sub(
        Expr::add(
            Expr::sqr(Expr::sub(Expr::point_x(1), Expr::point_x(0))),
            Expr::sqr(Expr::sub(Expr::point_y(1), Expr::point_y(0))),
        ),
        Expr::sqr(Expr::slot_param(0)),
    );
    Ok(vec![ConstraintDef::general(eq)
        .with_entities(vec![p1, p2])
        .with_params(vec![dist])])
}
