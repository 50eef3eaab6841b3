//! Two-tier repository synchronization (§4.5): a realtime `notify` watcher
//! for low-latency pickup, backed by a periodic full-scan reconciler that
//! catches anything the watcher missed (events dropped under load, changes
//! made while the process was down). Both exclude protected prefixes.

pub mod reconciler;
pub mod watcher;
