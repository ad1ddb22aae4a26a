// Re-export the output layer from the submodules
mod filenames;
mod router;
mod writer;
mod zip;

pub use filenames::FileNamePolicy;
pub use router::{OutputRouter, RouterSummary};
pub use writer::JsonDataWriter;
pub use zip::zip_output_files;
