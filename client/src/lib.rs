//! Versecut Client - project storage behind the Versecut token server.
//!
//! This crate provides the client side of Versecut:
//! - [`auth::AuthClient`] exchanges, refreshes and revokes sessions on the
//!   token server using the `session_id` cookie
//! - [`retry::Reauthenticator`] refreshes an expired access token once and
//!   retries, latching after a second rejection
//! - [`drive::DriveStore`] keeps project documents in the Google Drive
//!   application data folder
//!
//! # Example
//!
//! ```no_run
//! use versecut_client::auth::AuthClient;
//! use versecut_client::drive::DriveStore;
//! use versecut_client::retry::Reauthenticator;
//!
//! # async fn run() -> versecut_client::error::Result<()> {
//! let auth = AuthClient::new("https://versecut.example.com")?.with_session_id("abc");
//! let store = DriveStore::new("https://www.googleapis.com", Reauthenticator::new(auth))?;
//! for project in store.list_projects().await? {
//!     println!("{} {}", project.id, project.name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod drive;
pub mod error;
pub mod retry;
pub mod session_file;
