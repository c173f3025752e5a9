//! The log-domain response problem, posed for tiny-solver.
//!
//! The unknowns are a 256-entry log inverse response `a` and one log
//! irradiance `x[i]` per sampled location.  Each observation of level `p`
//! at location `i` under exposure `t` contributes the residual
//! `a[p] - (ln(t) + x[i])` through an optional Huber loss, and a weighted
//! second-difference residual on `a` keeps the curve smooth where data is
//! sparse.
//!
//! Every level and every location is its own one-dimensional variable,
//! so each residual block only touches the two or three entries it reads
//! and the Jacobian stays sparse.

use std::collections::HashMap;

use nalgebra::{DVector, RealField};
use tiny_solver::factors::Factor;
use tiny_solver::loss_functions::{HuberLoss, Loss};
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::LevenbergMarquardtOptimizer;

/// Number of entries in the log inverse response.
pub const LEVELS: usize = 256;

/// One valid pixel observation.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Observation {
    /// Index into the irradiance parameters.
    pub location: usize,
    pub level: u8,
    pub log_time: f64,
}

/// `a[level] - (ln(t) + x[location])`.
#[derive(Debug, Clone)]
struct ObservationFactor {
    log_time: f64,
}

impl<T: RealField> Factor<T> for ObservationFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 2, "expected [level, location] parameter blocks");
        let log_time: T = nalgebra::convert(self.log_time);
        let a = params[0][0].clone();
        let x = params[1][0].clone();
        nalgebra::dvector![a - (log_time + x)]
    }
}

/// `weight * (a[k - 1] - 2 a[k] + a[k + 1])`.
#[derive(Debug, Clone)]
struct SmoothnessFactor {
    weight: f64,
}

impl<T: RealField> Factor<T> for SmoothnessFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 3, "expected three neighbouring levels");
        let weight: T = nalgebra::convert(self.weight);
        let two: T = nalgebra::convert(2.0);
        let s = params[0][0].clone() - two * params[1][0].clone() + params[2][0].clone();
        nalgebra::dvector![weight * s]
    }
}

fn level_key(level: usize) -> String {
    format!("a{}", level)
}

fn location_key(location: usize) -> String {
    format!("x{}", location)
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SolverOptions {
    pub max_num_iterations: usize,
    /// Stop once an accepted step lowers the cost by less than this
    /// fraction.
    pub function_tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            max_num_iterations: 50,
            function_tolerance: 1e-6,
        }
    }
}

impl SolverOptions {
    pub fn max_num_iterations(mut self, n: usize) -> Self {
        self.max_num_iterations = n;
        self
    }
}

/// State after one solver iteration, handed to the iteration callback.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IterationSummary {
    /// Zero-based.
    pub iteration: usize,
    pub cost: f64,
    /// Decrease in cost over this iteration.  Zero for rejected steps.
    pub cost_change: f64,
    pub step_accepted: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Termination {
    Converged,
    NoConvergence,
    Failure,
}

#[derive(Debug, Clone)]
pub struct SolverSummary {
    pub num_parameters: usize,
    pub num_residuals: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub successful_steps: usize,
    pub unsuccessful_steps: usize,
    pub termination: Termination,
    pub message: String,
}

impl SolverSummary {
    pub fn iterations(&self) -> usize {
        self.successful_steps + self.unsuccessful_steps
    }

    pub fn full_report(&self) -> String {
        let mut report = String::new();
        report.push_str("Solver Summary\n\n");
        report.push_str(&format!("{:<28}{:>12}\n", "Parameters", self.num_parameters));
        report.push_str(&format!("{:<28}{:>12}\n", "Residuals", self.num_residuals));
        report.push_str(&format!("{:<28}{:>12.6e}\n", "Initial cost", self.initial_cost));
        report.push_str(&format!("{:<28}{:>12.6e}\n", "Final cost", self.final_cost));
        report.push_str(&format!("{:<28}{:>12}\n", "Successful steps", self.successful_steps));
        report.push_str(&format!(
            "{:<28}{:>12}\n",
            "Unsuccessful steps", self.unsuccessful_steps
        ));
        report.push_str(&format!("{:<28}{:>12?}\n", "Termination", self.termination));
        report.push_str(&format!("{:<28}{}", "Reason", self.message));
        report
    }
}

#[derive(Debug, Clone)]
pub struct ResponseProblem {
    pub observations: Vec<Observation>,
    pub num_locations: usize,
    /// Huber threshold of the observation residuals.  Zero or negative
    /// selects a plain squared loss.
    pub huber_scale: f64,
    /// Weight of the smoothness residuals.  Squared second differences
    /// are multiplied by its square.
    pub smoothing: f64,
    /// Level whose log response is held constant.
    pub fixed_level: usize,
}

impl ResponseProblem {
    fn build(&self) -> Problem {
        let mut problem = Problem::new();
        problem.fix_variable(&level_key(self.fixed_level), 0);

        for o in self.observations.iter() {
            let loss: Option<Box<dyn Loss + Send>> = if self.huber_scale > 0.0 {
                Some(Box::new(HuberLoss::new(self.huber_scale)))
            } else {
                None
            };
            let level = level_key(o.level as usize);
            let location = location_key(o.location);
            problem.add_residual_block(
                1,
                &[level.as_str(), location.as_str()],
                Box::new(ObservationFactor {
                    log_time: o.log_time,
                }),
                loss,
            );
        }

        for k in 1..(LEVELS - 1) {
            let keys = [level_key(k - 1), level_key(k), level_key(k + 1)];
            problem.add_residual_block(
                1,
                &[keys[0].as_str(), keys[1].as_str(), keys[2].as_str()],
                Box::new(SmoothnessFactor {
                    weight: self.smoothing,
                }),
                None,
            );
        }

        problem
    }

    /// Cost of the parameters `a` and `x`, with the loss applied.
    pub fn cost(&self, a: &[f64], x: &[f64]) -> f64 {
        evaluate(&self.build(), &to_values(a, x))
    }

    /// Minimizes the cost starting from `a` and `x`, which are updated in
    /// place.  `callback` runs after every iteration with the current
    /// parameters.
    pub fn solve<F>(
        &self,
        a: &mut [f64],
        x: &mut [f64],
        options: &SolverOptions,
        mut callback: F,
    ) -> SolverSummary
    where
        F: FnMut(&IterationSummary, &[f64], &[f64]),
    {
        debug_assert_eq!(a.len(), LEVELS);
        debug_assert_eq!(x.len(), self.num_locations);

        let problem = self.build();
        let optimizer = LevenbergMarquardtOptimizer::default();

        let mut current = to_values(a, x);
        let mut cost = evaluate(&problem, &current);
        let mut summary = SolverSummary {
            num_parameters: LEVELS - 1 + self.num_locations,
            num_residuals: self.observations.len() + LEVELS - 2,
            initial_cost: cost,
            final_cost: cost,
            successful_steps: 0,
            unsuccessful_steps: 0,
            termination: Termination::NoConvergence,
            message: "Maximum number of iterations reached".into(),
        };

        for iteration in 0..options.max_num_iterations {
            // The optimizer is driven one iteration at a time so every
            // step can be reported.
            let step = OptimizerOptions {
                max_iteration: 1,
                ..OptimizerOptions::default()
            };
            let next = match optimizer.optimize(&problem, &current, Some(step)) {
                Some(next) => next,
                None => {
                    summary.termination = Termination::Failure;
                    summary.message = "Linear solver failed".into();
                    break;
                }
            };

            let previous_cost = cost;
            let new_cost = evaluate(&problem, &next);
            let accepted = new_cost.is_finite() && new_cost < cost;
            if accepted {
                current = next;
                cost = new_cost;
                from_values(&current, a, x);
                summary.successful_steps += 1;
            } else {
                summary.unsuccessful_steps += 1;
            }

            let cost_change = previous_cost - cost;
            callback(
                &IterationSummary {
                    iteration: iteration,
                    cost: cost,
                    cost_change: cost_change,
                    step_accepted: accepted,
                },
                a,
                x,
            );

            if !accepted {
                summary.termination = Termination::Converged;
                summary.message = "No further decrease in cost".into();
                break;
            }
            if cost_change <= options.function_tolerance * previous_cost {
                summary.termination = Termination::Converged;
                summary.message = "Function tolerance reached".into();
                break;
            }
        }

        summary.final_cost = cost;
        summary
    }
}

fn to_values(a: &[f64], x: &[f64]) -> HashMap<String, DVector<f64>> {
    let levels = a
        .iter()
        .enumerate()
        .map(|(k, &v)| (level_key(k), DVector::from_element(1, v)));
    let locations = x
        .iter()
        .enumerate()
        .map(|(i, &v)| (location_key(i), DVector::from_element(1, v)));
    levels.chain(locations).collect()
}

fn from_values(values: &HashMap<String, DVector<f64>>, a: &mut [f64], x: &mut [f64]) {
    for (k, v) in a.iter_mut().enumerate() {
        if let Some(p) = values.get(&level_key(k)) {
            *v = p[0];
        }
    }
    for (i, v) in x.iter_mut().enumerate() {
        if let Some(p) = values.get(&location_key(i)) {
            *v = p[0];
        }
    }
}

fn evaluate(problem: &Problem, values: &HashMap<String, DVector<f64>>) -> f64 {
    let blocks = problem.initialize_parameter_blocks(values);
    let residuals = problem.compute_residuals(&blocks, true);
    0.5 * residuals.as_ref().squared_norm_l2()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Noise-free data from `a[k] = (k - 128) / 100`, whose second
    /// differences vanish.
    fn linear_problem(huber_scale: f64) -> (ResponseProblem, Vec<f64>) {
        let truth: Vec<f64> = (0..LEVELS).map(|k| (k as f64 - 128.0) * 0.01).collect();
        let mut observations = Vec::new();
        let mut num_locations = 0;
        for m in (20..200).step_by(4) {
            for j in 0..5 {
                let level = m + 10 * j;
                observations.push(Observation {
                    location: num_locations,
                    level: level as u8,
                    log_time: j as f64 * 0.1,
                });
            }
            num_locations += 1;
        }
        let problem = ResponseProblem {
            observations: observations,
            num_locations: num_locations,
            huber_scale: huber_scale,
            smoothing: 1.0,
            fixed_level: 128,
        };
        (problem, truth)
    }

    fn max_error(a: &[f64], truth: &[f64]) -> f64 {
        a.iter()
            .zip(truth.iter())
            .fold(0.0f64, |m, (a, b)| m.max((a - b).abs()))
    }

    #[test]
    fn factors() {
        let obs = ObservationFactor { log_time: 0.5 };
        let r: DVector<f64> = obs.residual_func(&[
            DVector::from_element(1, 2.0),
            DVector::from_element(1, 1.0),
        ]);
        assert!((r[0] - 0.5).abs() < 1e-12);

        let smooth = SmoothnessFactor { weight: 3.0 };
        let r: DVector<f64> = smooth.residual_func(&[
            DVector::from_element(1, 1.0),
            DVector::from_element(1, 1.5),
            DVector::from_element(1, 3.0),
        ]);
        assert!((r[0] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn cost_at_truth_is_zero() {
        let (problem, truth) = linear_problem(0.0);
        let x: Vec<f64> = (20..200)
            .step_by(4)
            .map(|m| (m as f64 - 128.0) * 0.01)
            .collect();
        assert!(problem.cost(&truth, &x) < 1e-20);
        assert!(problem.cost(&vec![0.0; LEVELS], &x) > 0.0);
    }

    #[test]
    fn recovers_linear_log_response() {
        let (problem, truth) = linear_problem(0.0);
        let mut a = vec![0.0; LEVELS];
        let mut x = vec![0.0; problem.num_locations];

        let mut calls = 0;
        let summary = problem.solve(&mut a, &mut x, &SolverOptions::default(), |it, _, _| {
            assert_eq!(it.iteration, calls);
            calls += 1;
        });

        assert_eq!(calls, summary.iterations());
        assert!(summary.final_cost < summary.initial_cost);
        assert!(summary.final_cost < 1e-8, "final cost {}", summary.final_cost);
        assert!(a[128].abs() < 1e-12);
        assert!(max_error(&a, &truth) < 1e-3, "error {}", max_error(&a, &truth));
    }

    #[test]
    fn huber_resists_outliers() {
        let solve = |huber_scale| {
            let (mut problem, truth) = linear_problem(huber_scale);
            // One grossly wrong observation of location 0.
            problem.observations.push(Observation {
                location: 0,
                level: 80,
                log_time: 0.0,
            });
            let mut a = vec![0.0; LEVELS];
            let mut x = vec![0.0; problem.num_locations];
            let options = SolverOptions::default().max_num_iterations(100);
            problem.solve(&mut a, &mut x, &options, |_, _, _| {});
            max_error(&a, &truth)
        };

        let l2 = solve(0.0);
        let huber = solve(0.05);
        assert!(huber < l2, "huber {} vs l2 {}", huber, l2);
    }

    #[test]
    fn fixed_level_stays_put() {
        let (mut problem, _) = linear_problem(0.05);
        problem.fixed_level = 60;
        let mut a = vec![0.25; LEVELS];
        let mut x = vec![0.0; problem.num_locations];
        problem.solve(&mut a, &mut x, &SolverOptions::default(), |_, a, _| {
            assert!((a[60] - 0.25).abs() < 1e-12);
        });
        assert!((a[60] - 0.25).abs() < 1e-12);
        assert!(a.iter().any(|&v| (v - 0.25).abs() > 1e-3));
    }
}
