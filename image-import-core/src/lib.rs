#![doc = "image-import-core: core pipeline for importing local disk images as UCloud custom images."]

//! This crate contains the upload → import → wait → clean-up pipeline and the data
//! models around it. It talks to the provider only through the
//! [`contract::CloudClient`] trait; the concrete HTTP client lives in the CLI crate.
//!
//! # Usage
//! Resolve an [`config::ImportConfig`] with [`config::ImportSettings::validate`], locate
//! the artifact with [`artifact::ArtifactRef::locate`], then call
//! [`pipeline::run_import`].

pub mod artifact;
pub mod bucket;
pub mod cleanup;
pub mod config;
pub mod contract;
pub mod error;
pub mod import;
pub mod pipeline;
pub mod poll;
pub mod redact;
pub mod retry;
pub mod upload;
