//! Page publishing with PDF export.
//!
//! Pages are served as HTML and can be exported as PDF attachments through
//! `/{identifier}/topdf/{identifier}.pdf`. The export pipeline lives in
//! [`application::pdf`].

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
