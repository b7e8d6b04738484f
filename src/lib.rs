//! Library to periodically download backups of a remote [Frappe][frappe] site.
//!
//! The remote site hands out its latest backup set (database dump, public and
//! private files) through an authenticated API method. An invocation checks if
//! a backup is [due](schedule::is_due), [fetches](fetch::Fetcher) the set,
//! [prunes](util::retention::prune) old sets and stores the time of the backup.
//! See [`orchestrator::AutoDownload::run_once`].
//!
//! [frappe]: https://frappeframework.com/

#![forbid(unsafe_code)]

pub mod cli;
pub mod fetch;
pub mod orchestrator;
pub mod schedule;
pub mod settings;
pub mod util;
