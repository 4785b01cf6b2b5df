//! Storage layer for quikdb.
//!
//! Records live in a sled tree keyed by entity name and record key. The live
//! schema, the version header and preferences sit in their own trees so a
//! migration step can rewrite all of them in one transaction.

mod config;
pub mod key;
mod record;
mod store;
mod transaction;
mod value;

pub use config::StoreConfig;
pub use record::Record;
pub use store::Store;
pub use transaction::{StepOp, StepTransaction};
pub use value::{Key, Value};
