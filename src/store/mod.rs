//! Document store integration
//!
//! The [`RecordSink`] trait is the seam between the ingest handler and the
//! database; [`MongoSink`] is the production implementation.

pub mod mongo;
pub mod sink;

pub use mongo::MongoSink;
pub use sink::{RecordSink, UnavailableSink};
