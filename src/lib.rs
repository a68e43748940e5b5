//! xsrfscan - Cross-Site Request Forgery audit scanner
//!
//! Crawls a target scope, classifies every discovered form by its anti-CSRF
//! token posture (missing, static, predictable, not enforced, protected) and
//! generates proof-of-concept documents for the exploitable ones.

pub mod config;
pub mod crawler;
pub mod error;
pub mod http;
pub mod models;
pub mod report;
pub mod scanner;
