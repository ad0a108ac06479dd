//! Query compilation: request parameters to store queries.

pub mod compiler;
pub mod descriptor;
pub mod filter;
pub mod params;

pub use compiler::{compile, RESERVED_PARAMS};
pub use descriptor::{Echo, FindQuery, Pagination, Populate, QueryDescriptor, SortKey};
pub use filter::{CompareOp, Filter, Pattern};
pub use params::RequestParams;
