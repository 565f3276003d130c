//! Filter composition and event retrieval.
//!
//! `FilterComposer` turns untrusted query parameters into a canonical
//! `FilterSpec`; an `EventRepository` executes that spec. Two repositories
//! ship here: an in-memory one (tests, demos, seed files) and Postgres.

pub mod dates;
pub mod filter;
pub mod memory;
pub mod postgres;
pub mod predicate;
pub mod repository;

pub use filter::{FilterComposer, FilterSpec, RawFilter, DEFAULT_LIMIT, MAX_CELLS, MAX_LIMIT};
pub use memory::MemoryEventRepository;
pub use postgres::PgEventRepository;
pub use repository::{EventRepository, RepositoryError};
