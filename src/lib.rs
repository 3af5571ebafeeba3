//! labeler - Taxonomy-driven mailbox labeling with an LLM classifier
//!
//! This crate provides the core functionality for the labeler, including the
//! label taxonomy, mailbox and LLM providers, and the run engine that
//! classifies recent threads and reconciles their labels.

pub mod config;
pub mod domain;
pub mod providers;
pub mod services;
