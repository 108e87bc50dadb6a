//! # Quadratic Programming
//!
//! $$
//! \min_{x}\ \tfrac12 x^\top G x + a^\top x
//! \quad\text{s.t.}\quad n_i^\top x = b_i\ (i\in E),\qquad n_j^\top x \ge b_j\ (j\in I)
//! $$
//!
//! Dual active-set method of Goldfarb and Idnani for strictly convex QPs. The
//! iteration starts from the unconstrained minimum and adds violated
//! constraints one at a time, dropping active inequalities whose multipliers
//! would turn negative, so no feasible starting point is needed and an empty
//! feasible set is detected when no constraint can be dropped.

use impl_new_derive::ImplNew;
use nalgebra::Cholesky;
use nalgebra::DMatrix;
use nalgebra::DVector;
use nalgebra::Dyn;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

/// Relative feasibility tolerance for constraint residuals.
const FEASIBILITY_TOL: f64 = 1e-9;
/// Relative residual under which a normal counts as spanned by the active set.
const DEPENDENCE_TOL: f64 = 1e-10;
const DUAL_TOL: f64 = 1e-14;

/// `normalᵀx (=|>=) rhs`.
#[derive(Clone, Debug, PartialEq, ImplNew)]
pub struct LinearConstraint {
  pub normal: DVector<f64>,
  pub rhs: f64,
}

impl LinearConstraint {
  fn slack(&self, x: &DVector<f64>) -> f64 {
    self.normal.dot(x) - self.rhs
  }

  fn tolerance(&self, x: &DVector<f64>) -> f64 {
    FEASIBILITY_TOL * (1.0 + self.rhs.abs() + self.normal.norm() * x.norm())
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QpError {
  #[error("hessian is not positive definite")]
  NotPositiveDefinite,
  #[error("constraints are infeasible")]
  Infeasible,
  #[error("iteration limit of {iterations} reached")]
  IterationLimit { iterations: usize },
  #[error("constraint residual {residual:e} after {iterations} iterations")]
  Inaccurate { residual: f64, iterations: usize },
}

/// Solution of a [`QuadraticProgram`].
#[derive(Clone, Debug)]
pub struct QpSolution {
  pub x: DVector<f64>,
  pub objective: f64,
  pub iterations: usize,
  /// Number of constraints active at the solution.
  pub active: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConstraintKind {
  Equality(usize),
  Inequality(usize),
}

#[derive(Clone, Debug)]
struct ActiveConstraint {
  kind: ConstraintKind,
  constraint: LinearConstraint,
}

/// Strictly convex quadratic program.
#[derive(Clone, Debug)]
pub struct QuadraticProgram {
  hessian: DMatrix<f64>,
  linear: DVector<f64>,
  equalities: Vec<LinearConstraint>,
  inequalities: Vec<LinearConstraint>,
}

impl QuadraticProgram {
  /// Objective `½xᵀGx + aᵀx`; `G` must be symmetric positive definite.
  pub fn new(hessian: DMatrix<f64>, linear: DVector<f64>) -> Self {
    Self {
      hessian,
      linear,
      equalities: Vec::new(),
      inequalities: Vec::new(),
    }
  }

  pub fn with_equality(mut self, normal: DVector<f64>, rhs: f64) -> Self {
    self.equalities.push(LinearConstraint::new(normal, rhs));
    self
  }

  /// Add `normalᵀx >= rhs`. Zero normals are dropped.
  pub fn with_inequality(mut self, normal: DVector<f64>, rhs: f64) -> Self {
    if normal.amax() > 0.0 || rhs > 0.0 {
      self.inequalities.push(LinearConstraint::new(normal, rhs));
    }
    self
  }

  pub fn dim(&self) -> usize {
    self.linear.len()
  }

  pub fn objective(&self, x: &DVector<f64>) -> f64 {
    0.5 * x.dot(&(&self.hessian * x)) + self.linear.dot(x)
  }

  /// Run the dual active-set iteration; each primal or dual step counts
  /// towards `max_iterations`.
  ///
  /// The final point is re-checked against every constraint; a residual above
  /// tolerance is reported as [`QpError::Inaccurate`] rather than returned.
  pub fn solve(&self, max_iterations: usize) -> Result<QpSolution, QpError> {
    let cholesky = self
      .hessian
      .clone()
      .cholesky()
      .ok_or(QpError::NotPositiveDefinite)?;

    let mut x = -cholesky.solve(&self.linear);
    let mut active: Vec<ActiveConstraint> = Vec::new();
    let mut u: Vec<f64> = Vec::new();
    let mut redundant = vec![false; self.equalities.len()];
    let mut iterations = 0;

    loop {
      while let Some(candidate) = self.next_constraint(&x, &active, &redundant) {
        let mut u_plus = u.clone();
        u_plus.push(0.0);

        loop {
          if iterations >= max_iterations {
            return Err(QpError::IterationLimit {
              iterations: max_iterations,
            });
          }
          iterations += 1;

          let normal = &candidate.constraint.normal;
          let (z, r) = self.step_directions(&cholesky, &active, normal, iterations)?;
          let slack = candidate.constraint.slack(&x);

          let mut t1 = f64::INFINITY;
          let mut blocking = None;
          for (j, c) in active.iter().enumerate() {
            if matches!(c.kind, ConstraintKind::Inequality(_)) && r[j] > DUAL_TOL {
              let ratio = u_plus[j] / r[j];
              if ratio < t1 {
                t1 = ratio;
                blocking = Some(j);
              }
            }
          }

          let dependent = is_dependent(&active, normal);
          let t2 = if dependent {
            f64::INFINITY
          } else {
            -slack / z.dot(normal)
          };

          if dependent {
            if let ConstraintKind::Equality(i) = candidate.kind {
              if slack.abs() <= candidate.constraint.tolerance(&x) {
                debug!(equality = i, "skipping redundant equality constraint");
                redundant[i] = true;
                break;
              }
            }
          }

          let Some(l) = blocking.filter(|_| t1 < t2) else {
            if t2.is_infinite() {
              return Err(QpError::Infeasible);
            }
            // Full step: the candidate becomes active.
            x += &z * t2;
            dual_update(&mut u_plus, &r, t2);
            active.push(candidate);
            u = u_plus;
            break;
          };

          // Partial step up to the blocking constraint, which leaves the set.
          if !dependent {
            x += &z * t1;
          }
          dual_update(&mut u_plus, &r, t1);
          active.remove(l);
          u_plus.remove(l);
        }
      }

      if let Some((polished, multipliers)) = self.polish(&x, &active) {
        x = polished;
        u = multipliers;
      }
      if self.next_constraint(&x, &active, &redundant).is_none() {
        break;
      }
      debug!(iterations, "polished point leaves the feasible set, resuming");
    }

    if let Some(residual) = self.worst_violation(&x) {
      warn!(iterations, residual, "qp solution violates its constraints");
      return Err(QpError::Inaccurate {
        residual,
        iterations,
      });
    }

    let objective = self.objective(&x);
    debug!(iterations, active = active.len(), objective, "qp solved");

    Ok(QpSolution {
      x,
      objective,
      iterations,
      active: active.len(),
    })
  }

  /// Largest constraint residual beyond tolerance at `x`, if any.
  fn worst_violation(&self, x: &DVector<f64>) -> Option<f64> {
    if x.iter().any(|v| !v.is_finite()) {
      return Some(f64::INFINITY);
    }
    let equalities = self
      .equalities
      .iter()
      .map(|c| (c.slack(x).abs(), c.tolerance(x)));
    let inequalities = self
      .inequalities
      .iter()
      .map(|c| (-c.slack(x), c.tolerance(x)));

    equalities
      .chain(inequalities)
      .filter(|(violation, tol)| violation > tol)
      .map(|(violation, _)| violation)
      .max_by(f64::total_cmp)
  }

  /// Primal direction `z = H n` and dual direction `r = N* n` for the current
  /// active set, read off the KKT system
  ///
  /// $$
  /// \begin{bmatrix} G & N \\ N^\top & 0 \end{bmatrix}
  /// \begin{bmatrix} z \\ r \end{bmatrix} =
  /// \begin{bmatrix} n \\ 0 \end{bmatrix}
  /// $$
  ///
  /// so that `Nᵀz = 0` holds to working precision even when `G` is badly
  /// conditioned.
  fn step_directions(
    &self,
    cholesky: &Cholesky<f64, Dyn>,
    active: &[ActiveConstraint],
    normal: &DVector<f64>,
    iterations: usize,
  ) -> Result<(DVector<f64>, DVector<f64>), QpError> {
    if active.is_empty() {
      return Ok((cholesky.solve(normal), DVector::zeros(0)));
    }

    let n = self.dim();
    let q = active.len();
    let mut rhs = DVector::zeros(n + q);
    rhs.rows_mut(0, n).copy_from(normal);

    let sol = self
      .kkt_matrix(active)
      .lu()
      .solve(&rhs)
      .filter(|sol| sol.iter().all(|v| v.is_finite()))
      .ok_or(QpError::Inaccurate {
        residual: f64::INFINITY,
        iterations,
      })?;
    Ok((sol.rows(0, n).into_owned(), sol.rows(n, q).into_owned()))
  }

  /// `[[G, N], [Nᵀ, 0]]` for the active normals `N`.
  fn kkt_matrix(&self, active: &[ActiveConstraint]) -> DMatrix<f64> {
    let n = self.dim();
    let q = active.len();
    let mut kkt = DMatrix::zeros(n + q, n + q);
    kkt.view_mut((0, 0), (n, n)).copy_from(&self.hessian);
    for (k, c) in active.iter().enumerate() {
      kkt.view_mut((0, n + k), (n, 1)).copy_from(&c.constraint.normal);
      kkt
        .view_mut((n + k, 0), (1, n))
        .copy_from(&c.constraint.normal.transpose());
    }
    kkt
  }

  /// Pending equalities first (in order), then the most violated inequality.
  fn next_constraint(
    &self,
    x: &DVector<f64>,
    active: &[ActiveConstraint],
    redundant: &[bool],
  ) -> Option<ActiveConstraint> {
    let is_active = |kind: ConstraintKind| active.iter().any(|c| c.kind == kind);

    for (i, eq) in self.equalities.iter().enumerate() {
      if redundant[i] || is_active(ConstraintKind::Equality(i)) {
        continue;
      }
      // Orient the equality so the current point violates it from below.
      let constraint = if eq.slack(x) > 0.0 {
        LinearConstraint::new(-&eq.normal, -eq.rhs)
      } else {
        eq.clone()
      };
      return Some(ActiveConstraint {
        kind: ConstraintKind::Equality(i),
        constraint,
      });
    }

    self
      .inequalities
      .iter()
      .enumerate()
      .filter(|(j, _)| !is_active(ConstraintKind::Inequality(*j)))
      .map(|(j, c)| (j, c.slack(x), c.tolerance(x)))
      .filter(|(_, slack, tol)| *slack < -tol)
      .min_by(|a, b| a.1.total_cmp(&b.1))
      .map(|(j, _, _)| ActiveConstraint {
        kind: ConstraintKind::Inequality(j),
        constraint: self.inequalities[j].clone(),
      })
  }

  /// Re-solve the KKT system of the current active set to remove the drift
  /// accumulated by the incremental updates. Returns the point together with
  /// its multipliers, inequality multipliers clipped at zero.
  fn polish(
    &self,
    x: &DVector<f64>,
    active: &[ActiveConstraint],
  ) -> Option<(DVector<f64>, Vec<f64>)> {
    let n = self.dim();
    let q = active.len();
    let mut rhs = DVector::zeros(n + q);
    rhs.rows_mut(0, n).copy_from(&(-&self.linear));
    for (k, c) in active.iter().enumerate() {
      rhs[n + k] = c.constraint.rhs;
    }

    let sol = self.kkt_matrix(active).lu().solve(&rhs)?;
    if sol.iter().any(|v| !v.is_finite()) {
      return None;
    }

    let polished = sol.rows(0, n).into_owned();
    let drift = (&polished - x).norm();
    if drift > 1e-6 * (1.0 + x.norm()) {
      debug!(drift, "discarding kkt polish");
      return None;
    }

    let multipliers = active
      .iter()
      .zip(sol.rows(n, q).iter())
      .map(|(c, lambda)| match c.kind {
        ConstraintKind::Equality(_) => -lambda,
        ConstraintKind::Inequality(_) => (-lambda).max(0.0),
      })
      .collect();
    Some((polished, multipliers))
  }
}

/// Whether `normal` lies in the span of the active normals.
fn is_dependent(active: &[ActiveConstraint], normal: &DVector<f64>) -> bool {
  if active.is_empty() {
    return false;
  }
  let n = normal.len();
  let big_n = DMatrix::from_fn(n, active.len(), |i, j| active[j].constraint.normal[i]);
  let q = big_n.qr().q();
  let residual = normal - &q * (q.transpose() * normal);
  residual.norm() <= DEPENDENCE_TOL * normal.norm()
}

fn dual_update(u_plus: &mut [f64], r: &DVector<f64>, t: f64) {
  let q = r.len();
  for j in 0..q {
    u_plus[j] -= t * r[j];
  }
  u_plus[q] += t;
}
