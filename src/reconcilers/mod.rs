//! Reconcilers for backup plan CRDs
//!
//! This module contains the lifecycle logic shared by all plan kinds:
//! - Spec validation
//! - The finalizer-gated create/update/delete state machine
//! - The pure CronJob spec builder

pub mod cronjob;
pub mod plan;
