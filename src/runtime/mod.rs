//! Per-instance state machine over the process graph

mod service;
mod view;

pub use service::RuntimeService;
pub use view::{
    CurrentForm, DocumentSummary, RenderedField, RenderedForm, SubmitOutcome, SubmitRequest,
    TransitionView,
};
