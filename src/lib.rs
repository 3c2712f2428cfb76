//! Confreg – a typed configuration and procedure-call registry.
//!
//! Independently written program modules each register a table of named,
//! typed items before the main logic starts. Once every table is in, the
//! registry is finalized, after which items can be assigned for the life of
//! the process, either from line oriented text statements or from a compact
//! binary encoding with the same semantics.
//!
//! An item is one of:
//! * a numeric array ([`datatype::ItemType::Short`], `Integer`, `Double`, ...),
//!   optionally bounded, with clamping or strict rejection,
//! * a text of bounded length,
//! * a function, whose callback receives the literal assignment text,
//! * an array of an externally defined element type, handled through a
//!   registered [`datatype::BinaryInterface`].
//!
//! Every assignment is a small transaction: touched elements are staged, an
//! optional callback may decline the change, and the item is then committed
//! or rolled back to its exact previous contents.
//!
//! ## Modules
//! * [`construct`] – item declarations, resolved items, sections and flags.
//! * [`datatype`] – the type vocabulary and the typed storage of items.
//! * [`numeric`] – numeric token rules and bounds.
//! * [`staging`] – modification tracking and rollback.
//! * [`registry`] – registration, finalization, lookup and locking.
//! * [`interface`] – sessions, line sources and output sinks.
//! * [`wire`] – the binary container read by binary assignments.
//! * [`commands`] – the built-in `SHOW`, `LOCK`, `LIST`, ... items.
//! * [`history`] – the optional log of applied assignments.
//!
//! ## Text Statements
//! ```text
//! [SET ]name[:|=] value[, value...]     Foo 1, 2, 3
//! name: lo-hi: value                    Foo: 2-3: 7
//! name: (list): value                   Foo: (0,2-3): 1
//! name: n*value                         Foo 3*0
//! [section]:  or  section:              [Detector]:
//! ```
//! Several statements may share a line, separated by `;`. A `%` starts a comment.
//!
//! ## Quick Start
//! ```
//! use confreg::{ItemDef, ItemFlags, Registry};
//! let mut registry = Registry::new();
//! registry
//!     .register(
//!         vec![
//!             ItemDef::new("LEVel", "Integer", 1).initial("3").bounds("0", "10"),
//!             ItemDef::new("Weights", "Double", 4).flags(ItemFlags::REQUIRE_ALL_DATA),
//!         ],
//!         Some("Detector"),
//!     )
//!     .unwrap();
//! let mut source = vec!["Weights all: 0.5".to_string()].into_iter();
//! registry.finalize(Some(&mut || source.next())).unwrap();
//! registry.apply_text("lev 12").unwrap(); // clamped to 10
//! assert_eq!(registry.values("Detector:LEVel").unwrap(), confreg::Values::I32(vec![10]));
//! ```

mod assign;
mod binary;
pub mod commands;
pub mod construct;
pub mod datatype;
pub mod error;
pub mod history;
pub mod interface;
pub mod numeric;
pub mod registry;
pub mod staging;
pub mod wire;

pub use commands::{ListFormat, ListStyle};
pub use construct::{
    Block, BlockStatus, Callback, Change, ChangeSet, Invocation, Item, ItemDef, ItemFlags, callback,
};
pub use datatype::{BinaryInterface, ItemType, Scalar, Values};
pub use error::{ConfregError, Result, Status, status_of};
pub use history::HistoryEntry;
pub use interface::{BufferSink, LineSource, OutputSink, ReaderSource, Session, StdoutSink};
pub use numeric::{Bounds, Number, NumericKind};
pub use registry::{INTERNAL_SECTION, Phase, Registry};
