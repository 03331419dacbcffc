// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Building blocks for observe / create / remove style reconciliation.
//!
//! A manager of some external resource implements [`Observe`] to report what currently exists, and
//! [`Create`] / [`Remove`] to move the external system towards what is required.  Deciding *what*
//! to create or remove is left to the caller.

#![deny(clippy::all, clippy::pedantic)]
#![allow(async_fn_in_trait)]

/// Report the current state of an external resource.
pub trait Observe {
    type Observation;

    async fn observe(&self) -> Self::Observation;
}

/// Bring a required object into existence.
pub trait Create {
    type Requirement;
    type Outcome;

    async fn create(&self, requirement: &Self::Requirement) -> Self::Outcome;
}

/// Remove a previously observed object.
pub trait Remove {
    type Observation;
    type Outcome;

    async fn remove(&self, observation: &Self::Observation) -> Self::Outcome;
}

/// Conversion from an observed object to the requirement which would have produced it.
pub trait AsRequirement<Requirement> {
    fn as_requirement(&self) -> Requirement;
}

/// How the caller of a failed operation should react to the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// transient: the operation may succeed if attempted again later
    Retryable,
    /// the operation can't succeed without operator intervention
    Fatal,
    /// the failure only concerns one object and can be skipped
    Ignorable,
}

/// Classification of errors into [`ErrorClass`]es.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}
