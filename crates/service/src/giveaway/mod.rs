//! Giveaway domain: users earn points for tasks, link an X account and
//! register on the droplist.

pub mod domain;
pub mod ops;
pub mod service;

pub use service::{GiveawayService, GiveawayStores, XRedirects};
