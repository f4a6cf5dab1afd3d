pub mod capabilities;
pub mod endpoint;
pub mod query;
pub mod schema;

pub use capabilities::*;
pub use endpoint::*;
pub use query::*;
pub use schema::*;
