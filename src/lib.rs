mod batch;
mod error;
mod fill;
mod font;
mod overlay;
mod pdf;
mod placement;
mod raster;
mod types;

pub use batch::{BatchExporter, BatchOutcome, BatchRecord, FillResult};
pub use error::FillError;
pub use fill::{TemplateKind, fill_template};
pub use font::{CJK_BUILTIN, CJK_DISCOVERED, FontHandle, FontSource, SystemFonts};
pub use placement::{
    PlacementDescriptor, RecordData, RenderedValue, bind, placements_from_json,
};
pub use types::{Pt, Size};
