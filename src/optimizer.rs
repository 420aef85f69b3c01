//! Antenna parameter optimizer.
//!
//! Nelder-Mead search where every objective evaluation is a full solver run:
//! apply the variable vector to the wire list, build a simulation request,
//! run the solver, parse, and score. Failed evaluations cost a flat penalty
//! so the simplex walks away from invalid geometry instead of aborting.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use argmin::core::{CostFunction, Error as ArgminError, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::antenna::{Excitation, GroundConfig, LumpedLoad, TransmissionLine, Wire};
use crate::deck::build_card_deck;
use crate::output::{parse_nec_output, round_to};
use crate::request::{FrequencyConfig, PatternConfig, SimulationRequest};
use crate::results::FrequencyResult;
use crate::runner::SolverRunner;

/// Cost assigned to evaluations that fail (invalid geometry, solver failure,
/// empty parse).
pub const PENALTY_COST: f64 = 1e6;

/// What to optimize for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationObjective {
    /// Minimize SWR at the target frequency.
    MinSwr,
    /// Minimize the mean SWR across the sweep.
    MinSwrBand,
    /// Maximize gain at the target frequency.
    MaxGain,
    /// Maximize front-to-back ratio at the target frequency.
    MaxFb,
    /// Weighted combination of SWR, gain and front/back.
    Combined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMethod {
    NelderMead,
}

/// Wire fields a variable may drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireField {
    X1,
    Y1,
    Z1,
    X2,
    Y2,
    Z2,
    Radius,
}

impl WireField {
    pub fn as_str(self) -> &'static str {
        match self {
            WireField::X1 => "x1",
            WireField::Y1 => "y1",
            WireField::Z1 => "z1",
            WireField::X2 => "x2",
            WireField::Y2 => "y2",
            WireField::Z2 => "z2",
            WireField::Radius => "radius",
        }
    }

    fn get(self, wire: &Wire) -> f64 {
        match self {
            WireField::X1 => wire.x1,
            WireField::Y1 => wire.y1,
            WireField::Z1 => wire.z1,
            WireField::X2 => wire.x2,
            WireField::Y2 => wire.y2,
            WireField::Z2 => wire.z2,
            WireField::Radius => wire.radius,
        }
    }

    fn set(self, wire: &mut Wire, value: f64) {
        match self {
            WireField::X1 => wire.x1 = value,
            WireField::Y1 => wire.y1 = value,
            WireField::Z1 => wire.z1 = value,
            WireField::X2 => wire.x2 = value,
            WireField::Y2 => wire.y2 = value,
            WireField::Z2 => wire.z2 = value,
            WireField::Radius => wire.radius = value,
        }
    }
}

fn default_link_factor() -> f64 {
    1.0
}

/// A parameter to optimize: one wire field with bounds, optionally linked to
/// a second wire field as a value-level symmetry constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationVariable {
    pub wire_tag: u32,
    pub field: WireField,
    pub min_value: f64,
    pub max_value: f64,
    #[serde(default)]
    pub initial_value: Option<f64>,
    #[serde(default)]
    pub linked_wire_tag: Option<u32>,
    #[serde(default)]
    pub linked_field: Option<WireField>,
    #[serde(default = "default_link_factor")]
    pub link_factor: f64,
}

impl OptimizationVariable {
    pub fn name(&self) -> String {
        format!("{}.{}", self.wire_tag, self.field.as_str())
    }
}

fn default_swr_weight() -> f64 {
    1.0
}

/// Weights for the combined objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationWeights {
    #[serde(default = "default_swr_weight")]
    pub swr_weight: f64,
    #[serde(default)]
    pub gain_weight: f64,
    #[serde(default)]
    pub fb_weight: f64,
}

impl Default for OptimizationWeights {
    fn default() -> Self {
        Self {
            swr_weight: default_swr_weight(),
            gain_weight: 0.0,
            fb_weight: 0.0,
        }
    }
}

fn default_freq_steps() -> u32 {
    1
}

fn default_max_iterations() -> u32 {
    100
}

fn default_objective() -> OptimizationObjective {
    OptimizationObjective::MinSwr
}

fn default_method() -> OptimizationMethod {
    OptimizationMethod::NelderMead
}

/// Request body for `POST /api/v1/optimize` and the WS first message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub wires: Vec<Wire>,
    pub excitations: Vec<Excitation>,
    #[serde(default)]
    pub ground: GroundConfig,
    pub frequency_start_mhz: f64,
    pub frequency_stop_mhz: f64,
    #[serde(default = "default_freq_steps")]
    pub frequency_steps: u32,
    #[serde(default)]
    pub loads: Vec<LumpedLoad>,
    #[serde(default)]
    pub transmission_lines: Vec<TransmissionLine>,
    pub variables: Vec<OptimizationVariable>,
    #[serde(default = "default_objective")]
    pub objective: OptimizationObjective,
    #[serde(default = "default_method")]
    pub method: OptimizationMethod,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub target_frequency_mhz: Option<f64>,
    #[serde(default)]
    pub weights: OptimizationWeights,
}

impl OptimizationRequest {
    pub fn validate(&self) -> Result<(), crate::antenna::ValidationError> {
        use crate::antenna::ValidationError;
        if self.wires.is_empty() || self.wires.len() > 500 {
            return Err(ValidationError::new("wire count must be within [1, 500]"));
        }
        if self.excitations.is_empty() {
            return Err(ValidationError::new("at least one excitation is required"));
        }
        if self.variables.is_empty() || self.variables.len() > 10 {
            return Err(ValidationError::new("variable count must be within [1, 10]"));
        }
        if !(1..=500).contains(&self.max_iterations) {
            return Err(ValidationError::new("max_iterations must be within [1, 500]"));
        }
        if !(1..=51).contains(&self.frequency_steps) {
            return Err(ValidationError::new("frequency_steps must be within [1, 51]"));
        }
        for (name, v) in [
            ("frequency_start_mhz", self.frequency_start_mhz),
            ("frequency_stop_mhz", self.frequency_stop_mhz),
        ] {
            if !v.is_finite() || !(0.1..=2000.0).contains(&v) {
                return Err(ValidationError::new(format!(
                    "{name} must be within [0.1, 2000] MHz"
                )));
            }
        }
        if let Some(t) = self.target_frequency_mhz {
            if !t.is_finite() || !(0.1..=2000.0).contains(&t) {
                return Err(ValidationError::new(
                    "target_frequency_mhz must be within [0.1, 2000] MHz",
                ));
            }
        }
        for var in &self.variables {
            if !var.min_value.is_finite()
                || !var.max_value.is_finite()
                || var.max_value < var.min_value
            {
                return Err(ValidationError::new(format!(
                    "variable {} has invalid bounds [{}, {}]",
                    var.name(),
                    var.min_value,
                    var.max_value
                )));
            }
            if !self.wires.iter().any(|w| w.tag == var.wire_tag) {
                return Err(ValidationError::new(format!(
                    "variable references wire tag {} which doesn't exist",
                    var.wire_tag
                )));
            }
            if let Some(linked) = var.linked_wire_tag {
                if !self.wires.iter().any(|w| w.tag == linked) {
                    return Err(ValidationError::new(format!(
                        "variable links wire tag {linked} which doesn't exist"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn target_mhz(&self) -> f64 {
        self.target_frequency_mhz
            .unwrap_or((self.frequency_start_mhz + self.frequency_stop_mhz) / 2.0)
    }
}

/// Progress update for one evaluation, streamed over the WS endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationProgress {
    pub iteration: u32,
    pub total_iterations: u32,
    pub current_cost: f64,
    pub best_cost: f64,
    pub best_values: BTreeMap<String, f64>,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    Success,
    MaxIterations,
    Error,
}

/// One history record per objective evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: u32,
    pub cost: f64,
    pub values: BTreeMap<String, f64>,
}

/// Final optimization response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub status: OptimizationStatus,
    pub iterations_used: u32,
    pub final_cost: f64,
    pub optimized_values: BTreeMap<String, f64>,
    pub optimized_wires: Vec<Wire>,
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub message: String,
}

/// The search was aborted before producing a result.
#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("optimization cancelled by client")]
    Cancelled,
}

/// Produces per-frequency results for a candidate geometry; None means the
/// evaluation failed and earns the penalty cost.
pub trait Evaluate: Send + Sync {
    fn frequency_data(&self, request: &SimulationRequest) -> Option<Vec<FrequencyResult>>;
}

/// Evaluator backed by the real deck builder, sandbox runner, and parser.
/// Runs on a blocking thread and re-enters the runtime per solver call.
pub struct SolverEvaluator {
    runner: SolverRunner,
    handle: tokio::runtime::Handle,
}

impl SolverEvaluator {
    pub fn new(runner: SolverRunner, handle: tokio::runtime::Handle) -> Self {
        Self { runner, handle }
    }
}

impl Evaluate for SolverEvaluator {
    fn frequency_data(&self, request: &SimulationRequest) -> Option<Vec<FrequencyResult>> {
        let deck = build_card_deck(request);
        match self.handle.block_on(self.runner.run(&deck)) {
            Ok(output) => Some(parse_nec_output(&output, &request.pattern, false)),
            Err(e) => {
                warn!("optimizer solver run failed: {e}");
                None
            }
        }
    }
}

/// Pattern grid used for every optimizer evaluation.
fn evaluation_pattern() -> PatternConfig {
    PatternConfig {
        theta_start: -90.0,
        theta_stop: 90.0,
        theta_step: 5.0,
        phi_start: 0.0,
        phi_stop: 360.0,
        phi_step: 5.0,
    }
}

/// Apply a variable vector to the wire list, producing a fresh list. Values
/// are expected pre-clamped; linked fields receive `link_factor * value`.
pub fn apply_variables(
    wires: &[Wire],
    variables: &[OptimizationVariable],
    values: &[f64],
) -> Vec<Wire> {
    let mut wires = wires.to_vec();
    for (var, &val) in variables.iter().zip(values) {
        if let Some(w) = wires.iter_mut().find(|w| w.tag == var.wire_tag) {
            var.field.set(w, val);
        }
        if let (Some(linked_tag), Some(linked_field)) = (var.linked_wire_tag, var.linked_field) {
            if let Some(w) = wires.iter_mut().find(|w| w.tag == linked_tag) {
                linked_field.set(w, val * var.link_factor);
            }
        }
    }
    wires
}

/// Starting value per variable: explicit, else the wire's current field
/// value, else the midpoint of the bounds.
pub fn initial_values(request: &OptimizationRequest) -> Vec<f64> {
    request
        .variables
        .iter()
        .map(|var| {
            if let Some(v) = var.initial_value {
                return v;
            }
            request
                .wires
                .iter()
                .find(|w| w.tag == var.wire_tag)
                .map(|w| var.field.get(w))
                .unwrap_or((var.min_value + var.max_value) / 2.0)
        })
        .collect()
}

fn clamp_values(values: &[f64], variables: &[OptimizationVariable]) -> Vec<f64> {
    values
        .iter()
        .zip(variables)
        .map(|(&v, var)| v.clamp(var.min_value, var.max_value))
        .collect()
}

fn values_map(variables: &[OptimizationVariable], values: &[f64]) -> BTreeMap<String, f64> {
    variables
        .iter()
        .zip(values)
        .map(|(var, &v)| (var.name(), round_to(v, 6)))
        .collect()
}

/// Score one set of parsed frequency results against the request objective.
pub fn objective_cost(request: &OptimizationRequest, freq_data: &[FrequencyResult]) -> f64 {
    let target = request.target_mhz();
    let closest = match freq_data.iter().min_by(|a, b| {
        (a.frequency_mhz - target)
            .abs()
            .total_cmp(&(b.frequency_mhz - target).abs())
    }) {
        Some(c) => c,
        None => return PENALTY_COST,
    };

    match request.objective {
        OptimizationObjective::MinSwr => closest.swr_50,
        OptimizationObjective::MinSwrBand => {
            freq_data.iter().map(|d| d.swr_50).sum::<f64>() / freq_data.len() as f64
        }
        OptimizationObjective::MaxGain => -closest.gain_max_dbi,
        OptimizationObjective::MaxFb => -closest.front_to_back_db.unwrap_or(0.0),
        OptimizationObjective::Combined => {
            let w = &request.weights;
            let mut cost = 0.0;
            if w.swr_weight > 0.0 {
                cost += w.swr_weight * closest.swr_50;
            }
            if w.gain_weight > 0.0 {
                cost -= w.gain_weight * closest.gain_max_dbi;
            }
            if w.fb_weight > 0.0 {
                cost -= w.fb_weight * closest.front_to_back_db.unwrap_or(0.0);
            }
            cost
        }
    }
}

/// Bookkeeping shared between the cost function and the driver.
#[derive(Default)]
struct SearchTrace {
    iteration_count: u32,
    best_cost: f64,
    best_values: BTreeMap<String, f64>,
    history: Vec<HistoryEntry>,
}

struct SearchProblem<'a, E: Evaluate> {
    request: &'a OptimizationRequest,
    evaluator: &'a E,
    progress: Option<&'a (dyn Fn(OptimizationProgress) + Send + Sync)>,
    cancelled: &'a AtomicBool,
    trace: Arc<Mutex<SearchTrace>>,
}

impl<'a, E: Evaluate> SearchProblem<'a, E> {
    fn evaluate(&self, values: &[f64]) -> f64 {
        let wires = apply_variables(&self.request.wires, &self.request.variables, values);
        let sim_request = SimulationRequest {
            wires,
            excitations: self.request.excitations.clone(),
            ground: self.request.ground.clone(),
            frequency: FrequencyConfig {
                start_mhz: self.request.frequency_start_mhz,
                stop_mhz: self.request.frequency_stop_mhz,
                steps: self.request.frequency_steps,
            },
            pattern: evaluation_pattern(),
            comment: "optimizer iteration".to_string(),
            loads: self.request.loads.clone(),
            transmission_lines: self.request.transmission_lines.clone(),
            compute_currents: false,
            arcs: vec![],
            transforms: vec![],
            symmetry: None,
            near_field: None,
        };
        if let Err(e) = sim_request.validate() {
            warn!("invalid geometry during optimization: {e}");
            return PENALTY_COST;
        }
        match self.evaluator.frequency_data(&sim_request) {
            Some(freq_data) if !freq_data.is_empty() => objective_cost(self.request, &freq_data),
            _ => PENALTY_COST,
        }
    }
}

impl<'a, E: Evaluate> CostFunction for SearchProblem<'a, E> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, ArgminError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(ArgminError::msg("optimization cancelled by client"));
        }

        let clamped = clamp_values(x, &self.request.variables);
        let cost = self.evaluate(&clamped);
        let values = values_map(&self.request.variables, &clamped);

        let (iteration, best_cost, best_values) = {
            let mut trace = self.trace.lock().unwrap();
            trace.iteration_count += 1;
            if cost < trace.best_cost {
                trace.best_cost = cost;
                trace.best_values = values.clone();
            }
            let iteration_count = trace.iteration_count;
            trace.history.push(HistoryEntry {
                iteration: iteration_count,
                cost: round_to(cost, 4),
                values: values.clone(),
            });
            if trace.iteration_count % 10 == 0 {
                info!(
                    "optimizer iteration {}: cost={:.4}, best={:.4}",
                    trace.iteration_count, cost, trace.best_cost
                );
            }
            (trace.iteration_count, trace.best_cost, trace.best_values.clone())
        };

        if let Some(progress) = self.progress {
            progress(OptimizationProgress {
                iteration,
                total_iterations: self.request.max_iterations,
                current_cost: round_to(cost, 4),
                best_cost: round_to(best_cost, 4),
                best_values,
                status: "running".to_string(),
            });
        }

        Ok(cost)
    }
}

/// Initial simplex: the starting point plus one vertex per dimension with a
/// 5% perturbation (0.00025 for zero coordinates).
fn initial_simplex(x0: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(x0.len() + 1);
    simplex.push(x0.to_vec());
    for i in 0..x0.len() {
        let mut vertex = x0.to_vec();
        if vertex[i] != 0.0 {
            vertex[i] *= 1.05;
        } else {
            vertex[i] = 0.00025;
        }
        simplex.push(vertex);
    }
    simplex
}

/// Run the Nelder-Mead search to completion (or cancellation).
///
/// Blocking: call from a worker thread. The progress callback fires once per
/// evaluation; the cancellation flag is observed at the next evaluation
/// boundary and surfaces as [`OptimizeError::Cancelled`].
pub fn run_optimization<E: Evaluate>(
    request: &OptimizationRequest,
    evaluator: &E,
    progress: Option<&(dyn Fn(OptimizationProgress) + Send + Sync)>,
    cancelled: &AtomicBool,
) -> Result<OptimizationResult, OptimizeError> {
    let x0 = initial_values(request);
    let var_count = x0.len();

    info!(
        "starting optimization: {} variables, {:?} objective, max {} iterations",
        var_count, request.objective, request.max_iterations
    );

    let trace = Arc::new(Mutex::new(SearchTrace {
        best_cost: f64::INFINITY,
        ..SearchTrace::default()
    }));
    let problem = SearchProblem {
        request,
        evaluator,
        progress,
        cancelled,
        trace: Arc::clone(&trace),
    };

    let run_result = build_solver(&x0).and_then(|solver| {
        Executor::new(problem, solver)
            .configure(|state| state.max_iters(request.max_iterations as u64))
            .run()
    });

    let trace = trace.lock().unwrap();
    let iterations_used = trace.iteration_count;

    match run_result {
        Ok(res) => {
            let best = res
                .state()
                .get_best_param()
                .cloned()
                .unwrap_or_else(|| x0.clone());
            let final_values = clamp_values(&best, &request.variables);
            let optimized_wires =
                apply_variables(&request.wires, &request.variables, &final_values);
            let final_cost = res.state().get_best_cost();
            let status = match res.state().get_termination_status() {
                TerminationStatus::Terminated(TerminationReason::MaxItersReached) => {
                    OptimizationStatus::MaxIterations
                }
                _ => OptimizationStatus::Success,
            };
            let message = res
                .state()
                .get_termination_reason()
                .map(|r| r.to_string())
                .unwrap_or_default();

            info!(
                "optimization complete: status={status:?}, iterations={iterations_used}, cost={final_cost:.4}"
            );

            Ok(OptimizationResult {
                status,
                iterations_used,
                final_cost: round_to(final_cost, 4),
                optimized_values: values_map(&request.variables, &final_values),
                optimized_wires,
                history: trace.history.clone(),
                message,
            })
        }
        Err(e) => {
            if cancelled.load(Ordering::Relaxed) {
                info!("optimization cancelled after {iterations_used} evaluations");
                return Err(OptimizeError::Cancelled);
            }
            warn!("optimization error: {e}");
            let final_cost = if trace.best_cost < PENALTY_COST {
                trace.best_cost
            } else {
                0.0
            };
            Ok(OptimizationResult {
                status: OptimizationStatus::Error,
                iterations_used,
                final_cost: round_to(final_cost, 4),
                optimized_values: values_map(&request.variables, &x0),
                optimized_wires: request.wires.clone(),
                history: trace.history.clone(),
                message: e.to_string(),
            })
        }
    }
}

fn build_solver(x0: &[f64]) -> Result<NelderMead<Vec<f64>, f64>, ArgminError> {
    let dim = x0.len() as f64;
    let mut solver = NelderMead::new(initial_simplex(x0)).with_sd_tolerance(0.001)?;
    // adaptive coefficients need at least two dimensions
    if x0.len() >= 2 {
        solver = solver
            .with_alpha(1.0)?
            .with_gamma(1.0 + 2.0 / dim)?
            .with_rho(0.75 - 1.0 / (2.0 * dim))?
            .with_sigma(1.0 - 1.0 / dim)?;
    }
    Ok(solver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::antenna::GroundType;
    use crate::results::Impedance;

    fn dipole_wires() -> Vec<Wire> {
        vec![Wire {
            tag: 1,
            segments: 21,
            x1: -5.0,
            y1: 0.0,
            z1: 10.0,
            x2: 5.0,
            y2: 0.0,
            z2: 10.0,
            radius: 0.001,
        }]
    }

    fn min_swr_request() -> OptimizationRequest {
        OptimizationRequest {
            wires: dipole_wires(),
            excitations: vec![Excitation {
                wire_tag: 1,
                segment: 11,
                voltage_real: 1.0,
                voltage_imag: 0.0,
            }],
            ground: GroundConfig {
                ground_type: GroundType::FreeSpace,
                ..GroundConfig::default()
            },
            frequency_start_mhz: 14.1,
            frequency_stop_mhz: 14.1,
            frequency_steps: 1,
            loads: vec![],
            transmission_lines: vec![],
            variables: vec![OptimizationVariable {
                wire_tag: 1,
                field: WireField::X2,
                min_value: 4.5,
                max_value: 5.5,
                initial_value: None,
                linked_wire_tag: None,
                linked_field: None,
                link_factor: 1.0,
            }],
            objective: OptimizationObjective::MinSwr,
            method: OptimizationMethod::NelderMead,
            max_iterations: 30,
            target_frequency_mhz: Some(14.1),
            weights: OptimizationWeights::default(),
        }
    }

    fn freq_result(freq: f64, swr: f64, gain: f64, fb: Option<f64>) -> FrequencyResult {
        FrequencyResult {
            frequency_mhz: freq,
            impedance: Impedance { real: 50.0, imag: 0.0 },
            swr_50: swr,
            gain_max_dbi: gain,
            gain_max_theta: 0.0,
            gain_max_phi: 0.0,
            front_to_back_db: fb,
            beamwidth_e_deg: None,
            beamwidth_h_deg: None,
            efficiency_percent: None,
            pattern: None,
            currents: None,
        }
    }

    #[test]
    fn apply_variables_is_nondestructive_and_links() {
        let mut wires = dipole_wires();
        wires.push(Wire {
            tag: 2,
            segments: 21,
            x1: -5.0,
            y1: 2.0,
            z1: 10.0,
            x2: 5.0,
            y2: 2.0,
            z2: 10.0,
            radius: 0.001,
        });
        let variables = vec![OptimizationVariable {
            wire_tag: 1,
            field: WireField::X2,
            min_value: 4.0,
            max_value: 6.0,
            initial_value: None,
            linked_wire_tag: Some(2),
            linked_field: Some(WireField::X1),
            link_factor: -1.0,
        }];
        let updated = apply_variables(&wires, &variables, &[5.25]);
        assert_eq!(updated[0].x2, 5.25);
        assert_eq!(updated[1].x1, -5.25);
        assert_eq!(wires[0].x2, 5.0);
    }

    #[test]
    fn initial_values_precedence() {
        let mut req = min_swr_request();
        assert_eq!(initial_values(&req), vec![5.0]);
        req.variables[0].initial_value = Some(4.8);
        assert_eq!(initial_values(&req), vec![4.8]);
    }

    #[test]
    fn objective_cost_picks_closest_frequency() {
        let req = min_swr_request();
        let data = vec![
            freq_result(14.0, 2.5, 7.2, None),
            freq_result(14.1, 1.4, 7.5, None),
            freq_result(14.2, 2.1, 7.3, None),
        ];
        assert_eq!(objective_cost(&req, &data), 1.4);
    }

    #[test]
    fn objective_cost_band_averages_swr() {
        let mut req = min_swr_request();
        req.objective = OptimizationObjective::MinSwrBand;
        let data = vec![
            freq_result(14.0, 2.0, 7.0, None),
            freq_result(14.2, 4.0, 7.0, None),
        ];
        assert_eq!(objective_cost(&req, &data), 3.0);
    }

    #[test]
    fn objective_cost_negates_gain_and_fb() {
        let mut req = min_swr_request();
        req.objective = OptimizationObjective::MaxGain;
        let data = vec![freq_result(14.1, 1.5, 7.5, Some(12.0))];
        assert_eq!(objective_cost(&req, &data), -7.5);

        req.objective = OptimizationObjective::MaxFb;
        assert_eq!(objective_cost(&req, &data), -12.0);

        req.objective = OptimizationObjective::MaxFb;
        let no_fb = vec![freq_result(14.1, 1.5, 7.5, None)];
        assert_eq!(objective_cost(&req, &no_fb), 0.0);
    }

    #[test]
    fn combined_objective_applies_weights() {
        let mut req = min_swr_request();
        req.objective = OptimizationObjective::Combined;
        req.weights = OptimizationWeights {
            swr_weight: 1.0,
            gain_weight: 0.5,
            fb_weight: 0.0,
        };
        let data = vec![freq_result(14.1, 2.0, 8.0, Some(10.0))];
        assert_eq!(objective_cost(&req, &data), 2.0 - 4.0);
    }

    /// Evaluator with a V-shaped SWR landscape over x2, minimum at 5.05.
    struct QuadraticEvaluator;

    impl Evaluate for QuadraticEvaluator {
        fn frequency_data(&self, request: &SimulationRequest) -> Option<Vec<FrequencyResult>> {
            let x2 = request.wires[0].x2;
            let swr = 1.2 + 10.0 * (x2 - 5.05).abs();
            Some(vec![freq_result(14.1, swr, 7.5, None)])
        }
    }

    #[test]
    fn search_improves_swr_within_bounds() {
        let req = min_swr_request();
        let cancelled = AtomicBool::new(false);
        let result = run_optimization(&req, &QuadraticEvaluator, None, &cancelled).unwrap();

        let initial_swr = 1.2 + 10.0 * (5.0f64 - 5.05).abs();
        assert!(result.final_cost <= initial_swr + 1e-9);
        assert!(result.iterations_used >= 1);
        assert_eq!(result.history.len(), result.iterations_used as usize);
        let x2 = result.optimized_values["1.x2"];
        assert!((4.5..=5.5).contains(&x2), "x2 out of bounds: {x2}");
        assert!(!matches!(result.status, OptimizationStatus::Error));
    }

    /// Evaluator that always fails, driving every evaluation to the penalty.
    struct FailingEvaluator;

    impl Evaluate for FailingEvaluator {
        fn frequency_data(&self, _request: &SimulationRequest) -> Option<Vec<FrequencyResult>> {
            None
        }
    }

    #[test]
    fn failed_evaluations_get_penalty_cost() {
        let req = min_swr_request();
        let cancelled = AtomicBool::new(false);
        let result = run_optimization(&req, &FailingEvaluator, None, &cancelled).unwrap();
        assert!(!result.history.is_empty());
        assert!(result.history.iter().all(|h| h.cost == PENALTY_COST));
    }

    #[test]
    fn cancellation_flag_aborts_search() {
        let req = min_swr_request();
        let cancelled = AtomicBool::new(true);
        let err = run_optimization(&req, &QuadraticEvaluator, None, &cancelled).unwrap_err();
        assert!(matches!(err, OptimizeError::Cancelled));
    }

    #[test]
    fn progress_callback_sees_every_evaluation() {
        let req = min_swr_request();
        let cancelled = AtomicBool::new(false);
        let seen = Mutex::new(Vec::new());
        let callback = |p: OptimizationProgress| {
            seen.lock().unwrap().push(p.iteration);
        };
        let result =
            run_optimization(&req, &QuadraticEvaluator, Some(&callback), &cancelled).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), result.iterations_used as usize);
        assert_eq!(seen.first(), Some(&1));
    }

    #[test]
    fn variable_bounds_validated() {
        let mut req = min_swr_request();
        req.variables[0].min_value = 6.0;
        assert!(req.validate().is_err());
        req.variables[0].min_value = 4.5;
        req.variables[0].wire_tag = 3;
        assert!(req.validate().is_err());
    }
}
