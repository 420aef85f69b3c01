//! Crate root: public surface and shared invariants.
//!
//! `antsim` brokers antenna simulation and parameter optimization against an
//! external NEC-2 solver. The library owns the full request pipeline the
//! HTTP binary glues together:
//!
//! - **Validation.** Requests are parsed into strongly typed models whose
//!   `validate` functions enforce field ranges and cross-field invariants
//!   (segment budget, tag references) before anything touches the solver.
//! - **Deck building.** [`deck::build_card_deck`] is pure: the same request
//!   always produces a byte-identical input deck.
//! - **Sandboxed execution.** [`runner::SolverRunner`] gives every
//!   invocation its own working directory, a hard wall-clock deadline, and
//!   guaranteed cleanup on every exit path.
//! - **Parsing.** [`output::parse_nec_output`] scans the solver report into
//!   per-frequency results and derives SWR, front/back ratio, beamwidths
//!   and efficiency. Malformed blocks are dropped, never fatal.
//! - **Caching & admission.** Results are memoized under a content hash of
//!   the canonical request JSON; a sliding-window rate limiter and a
//!   concurrency counter guard the solver. Both degrade to "allow" when the
//!   key-value store is unreachable.
//! - **Optimization.** [`optimizer::run_optimization`] drives a Nelder-Mead
//!   search where each objective evaluation is a full solver run, with
//!   per-evaluation progress and cooperative cancellation.

#![forbid(unsafe_code)]

/// Request admission: sliding-window rate limit + concurrency counter.
pub mod admission;
/// Antenna geometry and ground entities with field validation.
pub mod antenna;
/// Content-addressed result cache (zlib-compressed, 1 h TTL).
pub mod cache;
/// `.maa` / `.nec` import and export converters.
pub mod convert;
/// NEC2 card-deck builder.
pub mod deck;
/// Narrow async client for the Redis-compatible store.
pub mod kvs;
/// Nelder-Mead parameter optimizer.
pub mod optimizer;
/// Solver report parser and derived metrics.
pub mod output;
/// Simulation request model and cross-field validation.
pub mod request;
/// Result entities.
pub mod results;
/// Sandboxed solver subprocess runner.
pub mod runner;
/// Environment-driven settings snapshot.
pub mod settings;

pub use crate::antenna::ValidationError;
pub use crate::request::SimulationRequest;
pub use crate::results::SimulationResult;
pub use crate::runner::RunnerError;
pub use crate::settings::Settings;

/// Service version reported by the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
