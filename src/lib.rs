//! # dwigear
//!
//! Run orchestrator for managed diffusion-MRI preprocessing jobs. A run
//! stages its input dataset from the platform's data store into a canonical
//! BIDS layout, invokes the packaged preprocessing pipeline against it, and
//! bundles the results for upload on every exit path, success or failure.
//!
//! ## Modules
//!
//! - `context` - run parameters frozen once at startup
//! - `remote` - the data store contract and its HTTP client
//! - `stage` - dataset staging into the canonical layout
//! - `invoke` - pipeline parameter record and entry-point adapters
//! - `package` - per-category result archives
//! - `orchestrator` - stage sequencing, failure isolation, terminal cleanup
pub mod context;
pub mod invoke;
pub mod orchestrator;
pub mod package;
pub mod remote;
pub mod stage;
