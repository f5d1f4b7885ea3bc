//! Gate validation
//!
//! A synchronous pass/fail checkpoint run after each increment, before the
//! next is generated. The validator is a pure function of its inputs: a fixed
//! battery of independent, read-only checks run concurrently, and their
//! findings aggregate into a single verdict with a recommendation the stage
//! controller must honor.

pub mod checks;
pub mod result;
pub mod validator;

pub use result::{CheckFinding, GateResult, GateStatus, Recommendation, Verdict};
pub use validator::{GateInput, GateValidator};
