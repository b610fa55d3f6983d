//! Core engine for Weft - asynchronous block assembly and task scheduling.
//!
//! Compiled template code drives a [`Renderer`] synchronously, appending
//! lines into named [`Block`]s. Some of those lines carry deferred work:
//! placeholders, nested blocks, elements with async content hooks. At finish
//! time the engine discovers that work, runs it with bounded concurrency
//! while preserving declaration order, and only then serializes a stable
//! result.
//!
//! Everything runs on one cooperative execution context; futures here are
//! `!Send` by design and never spawned onto other threads.

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub use weft_types::{BlockId, Capabilities, ContentMode, DirtyFlags, LineId};

mod block;
mod config;
mod errors;
mod line;
mod node;
mod placeholder;
mod renderer;
mod scheduler;

pub use block::{AssemblyPledge, Block, Content, OutputPart};
pub use config::{ConfigError, RenderConfig};
pub use errors::RenderError;
pub use line::{Line, PreTask};
pub use node::{ElementNode, HtmlElement};
pub use placeholder::Placeholder;
pub use renderer::Renderer;

#[cfg(test)]
mod tests;
