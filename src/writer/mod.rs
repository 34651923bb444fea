//! PDF writing for incremental updates.
//!
//! ## Architecture
//!
//! ```text
//! new/updated objects + signature dictionary
//!     ↓
//! [IncrementalDocumentWriter] (original bytes + one appended revision)
//!     ↓
//! [ObjectSerializer] (serializes PDF objects)
//!     ↓
//! [PreparedRevision] (zero-filled /Contents, patched once signed)
//! ```
//!
//! [`AppearanceStreamBuilder`] produces the Form XObjects drawn by visible
//! signature widgets.

mod appearance_stream;
mod incremental;
mod object_serializer;

pub use appearance_stream::AppearanceStreamBuilder;
pub use incremental::{IncrementalDocumentWriter, PreparedRevision};
pub use object_serializer::{hex_upper, text_string, ObjectSerializer};
