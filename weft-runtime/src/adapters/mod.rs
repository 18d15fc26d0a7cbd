//! ABOUTME: Adapter boundaries for external collaborators
//! ABOUTME: LLM and embedding providers, index clients, native tool functions, document readers

pub mod embedding;
pub mod functions;
pub mod index;
pub mod llm;
pub mod readers;
