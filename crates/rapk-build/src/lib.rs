//! Template-based rebuild engine for redirect apps.
//!
//! A generic, signed template package is turned into a customized one either
//! by decompiling and recompiling it (`Strategy::Decompile`), by patching the
//! prebuilt archive in place (`Strategy::BinaryPatch`), or by running the full
//! build script (`Strategy::Script`). All three share the same contract: a
//! `RebuildRequest` in, a signed artifact in the output directory out.

mod archive;
mod binary_patch;
mod context;
mod decompile;
mod error;
mod layout;
pub mod manifest;
mod pipeline;
mod progress;
pub mod resources;
mod scratch;
mod script;
mod strategy;
mod templates;

pub use archive::{config_contents, rewrite_template, RewriteReport, CONFIG_ENTRY, MANIFEST_ENTRY};
pub use binary_patch::BinaryPatchPipeline;
pub use context::BuildContext;
pub use decompile::DecompilePipeline;
pub use error::BuildError;
pub use layout::ForgeLayout;
pub use manifest::{PatchOutcome, APP_NAME_SENTINEL};
pub use pipeline::{artifact_file_name, display_name_for, pipelines_for, RebuildPipeline, RebuildRequest};
pub use progress::ProgressSink;
pub use script::{parse_progress_line, ScriptPipeline};
pub use strategy::{Strategy, TemplateKind};
pub use templates::{TemplateHandle, TemplateStore, TEMPLATE_URL};
