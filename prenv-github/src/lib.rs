//! # prenv-github
//!
//! Source-host collaborators over HTTP: [`GithubClient`] lists open pull
//! requests and posts commit statuses; [`HttpHealthProbe`] checks whether a
//! preview environment answers.

pub mod client;
pub mod health;

pub use client::GithubClient;
pub use health::HttpHealthProbe;
