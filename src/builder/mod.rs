//! Native build pipeline.
//!
//! This module implements the build stages and the collaborators they drive:
//! the front-end, the whole-program scanner, the code generator, the linker
//! and the post-link fixups.

pub mod codegen;
pub mod exports;
pub mod frontend;
pub mod linker;
pub mod patch;
pub mod pipeline;
pub mod postlink;
pub mod scan;

pub use codegen::{CodegenEngine, ExternalCodegen};
pub use frontend::{ExternalFrontEnd, FrontEnd};
pub use linker::{synthesize, LinkCommand, LinkRequest};
pub use pipeline::{BuildContext, BuildReport, Pipeline, PipelineStage};
pub use scan::{ScanResult, Scanner};
