use thiserror::Error;

pub mod action_list;
pub mod check;
pub mod context;
pub mod item;
pub mod repair;
pub mod schedule;
pub mod types;

#[cfg(test)]
pub mod test_utils;

//------------------------------------------

/// Returned when the run stops early, either because the error limit
/// was reached or because another worker hit a fatal error.
#[derive(Debug, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

pub fn is_cancelled(e: &anyhow::Error) -> bool {
    e.downcast_ref::<Cancelled>().is_some()
}

//------------------------------------------
