//! Service layer for the giveaway backend.
//! - `storage`: queued, debounced JSON document stores every route builds on.
//! - `giveaway`: domain records and the operations routes call.
//! - `verify` / `oauth`: boundaries to signature oracles and X login.

pub mod errors;
pub mod giveaway;
pub mod oauth;
pub mod runtime;
pub mod storage;
pub mod verify;
