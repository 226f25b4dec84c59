//! Keeps a game server's entry in a remote server directory up to date.
//!
//! The [`controller::RegistrationController`] owns the registration
//! lifecycle and drives it through two capabilities it does not implement
//! itself: a [`directory::DirectoryClient`] that performs one exchange with
//! the directory, and a [`scheduler::Scheduler`] that fires the periodic
//! refresh.

pub mod controller;
pub mod directory;
pub mod error;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use controller::{RegistrationController, RegistrationSettings};
pub use directory::{DirectoryClient, Endpoint, ExchangeFailure, ExchangeResult, HttpDirectoryClient};
pub use error::RegistrationError;
pub use scheduler::{ScheduleHandle, Scheduler, TokioScheduler};
