//! HTML to PDF export.

pub mod backend;
pub mod delivery;
pub mod layout;
pub mod normalize;
pub mod renderer;
pub mod service;
pub mod store;
pub mod types;

pub use backend::PrintPdfBackend;
pub use delivery::{BufferedResponse, DeliveryEnvelope, ResponseSink, deliver, deliver_legacy};
pub use renderer::{
    BackendError, DocumentRenderer, FontFamily, LayoutBackend, Margins, Orientation, PageSize,
    RendererConfig,
};
pub use service::{HttpViewResolver, PdfService, ViewResolver, ViewResponse};
pub use store::{GeneratedDocument, TempOutputStore};
pub use types::{Delivered, OutputTarget, PdfError, RenderRequest, RenderSource, Session};
