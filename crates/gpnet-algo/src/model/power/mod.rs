//! Power network components.
//!
//! Every bus owns two states, voltage magnitude `V` and angle `φ`, and two
//! equations. With the bus admittance entries `G + jB` the injections are
//!
//! ```text
//! P_i =  G_ii V_i² + Σ_k V_i V_k (G_ik cos θ_ik + B_ik sin θ_ik)
//! Q_i = -B_ii V_i² + Σ_k V_i V_k (G_ik sin θ_ik - B_ik cos θ_ik)
//! ```
//!
//! where `θ_ik = φ_i - φ_k`. The bus kind decides which two of `V, φ, P, Q`
//! are prescribed. Lines carry no state; they only contribute admittances.

pub mod line;
pub mod node;

pub use line::Transmissionline;
pub use node::{PowerNode, PowerNodeKind};
