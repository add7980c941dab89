//! Versecut Server - OAuth token exchange with server-side sessions.
//!
//! This crate provides the server component of Versecut, responsible for:
//! - Exchanging OAuth authorization codes (PKCE) for tokens
//! - Keeping refresh tokens server-side, keyed by an opaque session cookie
//! - Refreshing and revoking provider tokens on behalf of the browser
//!
//! # Architecture
//!
//! The browser only ever holds a short-lived access token and an `HttpOnly`
//! `session_id` cookie. Refresh tokens live in a [`session::SessionStore`]
//! and are only sent to the provider's token endpoint.

pub mod config;
pub mod cookie;
pub mod error;
pub mod oauth;
pub mod provider;
pub mod routes;
pub mod session;
pub mod tokens;
