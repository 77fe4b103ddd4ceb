use odata_core::ExecutionError;

/// Runtime fault while evaluating a plan.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("instance at index {index} is not a JSON object")]
    NotAnObject { index: usize },
}

impl From<EvalError> for ExecutionError {
    fn from(err: EvalError) -> Self {
        ExecutionError::new(format!("in-memory execution failed: {err}")).with_source(err)
    }
}
