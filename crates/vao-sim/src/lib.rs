//! # vao-sim
//!
//! The Virtual Acoustic Ocean: a soft-realtime simulator for underwater
//! acoustic modem networks. It imitates the ADC/DAC endpoints of one or
//! more modems, streams synthesized received samples over the network at a
//! fixed wall-clock rate, and convolves transmitted bursts through a
//! propagation model so every other node hears them with the right delay,
//! gain, and reverberation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────── Simulation ──────────────────────────┐
//! │  scheduler thread: pace ADC clock, read tapes, inject noise    │
//! │          │                                                     │
//! │          ▼                                                     │
//! │  Node ── tapes ◄── transmit pipeline ◄── propagation model     │
//! │    │                                                           │
//! │    └─ ProtocolDaemon (UASP / UASP2) ◄──► client sockets        │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use vao_sim::{IsovelocityModel, NodeConfig, SimConfig, Simulation, Uasp2};
//!
//! let mut sim = Simulation::new(IsovelocityModel::default(), SimConfig::new(24_000.0));
//! sim.add_node(
//!     (0.0, 0.0, -10.0),
//!     NodeConfig::default(),
//!     Uasp2::new("0.0.0.0".parse().unwrap(), 9809),
//! )?;
//! sim.run()?;
//! // ... serve clients ...
//! sim.close();
//! # Ok::<(), vao_sim::SimError>(())
//! ```

pub mod daemon;
pub mod error;
pub mod node;
pub mod propagation;
pub mod sim;
mod transmit;

pub use daemon::uasp::Uasp;
pub use daemon::uasp2::Uasp2;
pub use daemon::{NodeClient, ProtocolDaemon, ProtocolSpec};
pub use error::{SimError, SimResult};
pub use node::NodeConfig;
pub use propagation::{Channel, IsovelocityModel, Position, PropagationModel};
pub use sim::{SimConfig, Simulation};
