//! Errors raised while wiring subscription handlers

use crate::validation::ValidationReport;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("{}", .0.message())]
    Validation(ValidationReport),
}
