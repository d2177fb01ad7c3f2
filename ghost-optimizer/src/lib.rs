pub mod driver;
pub mod error;
pub mod hessian;
pub mod kappa;
pub mod layout;
pub mod linprog;
pub mod oracle;
pub mod sampling;
pub mod stepsize;
pub mod subproblem;

pub use driver::{optimize, stochastic_ghost, DriverState, Outcome, StochasticGhost};
pub use error::{FailureContext, GhostError, OracleCall, Result};
pub use layout::ParamLayout;
pub use oracle::{FnOracle, StochasticOracle};
