//! Test doubles and canned data for exercising the pipeline without a
//! model or an archive on disk.

pub mod fixtures;
mod mocks;

pub use mocks::{Scripted, ScriptedInferenceClient, StaticArchiveReader};
