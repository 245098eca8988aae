// ── Reactive storage ──

mod collection;

pub use collection::{Keyed, LiveCollection, Snapshot};
