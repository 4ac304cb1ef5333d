//! Testing utilities for digestflow workflows.
//!
//! This module provides in-memory fakes for every external collaborator,
//! so workflows can be exercised without a database, news API, generative
//! service, or mail server.

mod fakes;

pub use fakes::{
    article, RecordingMailer, ScriptedNewsSource, ScriptedReply, ScriptedTextGenerator,
    StaticSubscriberSource,
};
