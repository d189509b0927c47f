//! Placeholder substitution for tool command and script templates.
//!
//! Templates use five marker families: `${in:NAME}`, `${out:NAME}`,
//! `${prop:NAME}`, `${dir:KIND}` and `${addProp:NAME}`. Every scalar inserted
//! into a template is checked against the unsafe character set of the target
//! [`SubstitutionContext`], which is the injection boundary between bound
//! values and the shells or script engine that run the rendered text.

pub mod bindings;
pub mod context;
pub mod render;

pub use bindings::OutputBindings;
pub use context::SubstitutionContext;
pub use render::{DirKind, MarkerFamily, PlaceholderEngine, RenderContext, SandboxDirs};
