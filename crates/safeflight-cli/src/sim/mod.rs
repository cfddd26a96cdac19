//! In-process simulation: scripted traffic, a simulated autopilot and the
//! scenario runner.

pub mod paths;
pub mod runner;
pub mod scenarios;
pub mod vehicle;

pub use paths::{CircularPath, FlightPath, LinearPath};
pub use runner::{ResolutionEvent, Simulation, SimulationSummary};
pub use scenarios::Scenario;
pub use vehicle::{SimVehicle, VehicleConfig};
